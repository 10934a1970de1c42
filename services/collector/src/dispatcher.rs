//! The dispatcher (spec.md §4.4): a single-threaded filter/rewrite/route
//! node. No task of its own — it runs synchronously on whichever ingress
//! task produced the event, since it owns no state that needs isolation
//! beyond the thread-safe sinks it calls (spec.md §5).

use lc_protocol::{Event, OpError};
use lc_queue::{Queue, QueueError};
use thiserror::Error;

use crate::config::DispatcherConfig;
use crate::output::local_sink::{LocalSink, LocalSinkError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    Standard,
    Prior,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteDecision {
    Dropped,
    Route(Priority),
}

/// Filter, rewrite and classify `event` in place. Pure and deterministic
/// for a fixed `cfg` (spec.md §8 "Dispatcher determinism").
pub fn filter_and_route(event: &mut Event, cfg: &DispatcherConfig) -> RouteDecision {
    if !event.is_valid() {
        return RouteDecision::Dropped;
    }
    if cfg.topic_ignores.contains(&event.topic) {
        return RouteDecision::Dropped;
    }
    if cfg.topic_require_keyword.contains(&event.topic) && event.keyword.is_empty() {
        return RouteDecision::Dropped;
    }
    if cfg.keyword_ignores.contains(&event.keyword) {
        return RouteDecision::Dropped;
    }

    if let Some(mapped) = cfg.env_mappings.get(&event.env) {
        event.env = mapped.clone();
    }
    if let Some(mapped) = cfg.topic_mappings.get(&event.topic) {
        event.topic = mapped.clone();
    }

    if event.topic == "x-access" && is_root_head_healthcheck(event) {
        return RouteDecision::Dropped;
    }

    event.via = cfg.hostname.clone();

    if cfg.priors.contains(&event.topic) {
        RouteDecision::Route(Priority::Prior)
    } else {
        RouteDecision::Route(Priority::Standard)
    }
}

/// Load-balancer health check suppression: `path == "/"` and `method`
/// (case-insensitive) `== "HEAD"`, both stashed in `extra` by the nginx
/// pipeline's `r` tag split.
fn is_root_head_healthcheck(event: &Event) -> bool {
    let path_is_root = event.extra.get("path").and_then(|v| v.as_str()) == Some("/");
    let is_head = event
        .extra
        .get("method")
        .and_then(|v| v.as_str())
        .is_some_and(|m| m.eq_ignore_ascii_case("HEAD"));
    path_is_root && is_head
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("local sink: {0}")]
    LocalSink(#[from] LocalSinkError),
    #[error("queue: {0}")]
    Queue(#[from] QueueError),
    #[error("op encode: {0}")]
    Encode(#[from] OpError),
}

/// All sink errors collected, none short-circuiting the others (spec.md
/// §4.4, §7 "error-join helper").
#[derive(Debug)]
pub struct JoinedDispatchError(pub Vec<DispatchError>);

impl std::fmt::Display for JoinedDispatchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let joined: Vec<String> = self.0.iter().map(ToString::to_string).collect();
        write!(f, "{}", joined.join("; "))
    }
}

impl std::error::Error for JoinedDispatchError {}

/// Filter/rewrite/route `event`, then deliver it to up to two sinks in
/// order (local file sink, then the appropriate priority queue), joining
/// errors from both rather than letting one short-circuit the other.
pub async fn dispatch(
    mut event: Event,
    cfg: &DispatcherConfig,
    local_sink: Option<&LocalSink>,
    standard_queue: &Queue,
    prior_queue: Option<&Queue>,
) -> Result<(), JoinedDispatchError> {
    let decision = filter_and_route(&mut event, cfg);
    let priority = match decision {
        RouteDecision::Dropped => return Ok(()),
        RouteDecision::Route(p) => p,
    };

    let mut errors = Vec::new();

    if let Some(sink) = local_sink {
        if let Err(e) = sink.write_event(&event).await {
            errors.push(DispatchError::LocalSink(e));
        }
    }

    let op = event.to_op();
    let target = match (priority, prior_queue) {
        (Priority::Prior, Some(q)) => q,
        _ => standard_queue,
    };
    match op.marshal() {
        Ok(bytes) => {
            if let Err(e) = target.put(bytes).await {
                errors.push(DispatchError::Queue(e));
            }
        }
        Err(e) => errors.push(DispatchError::Encode(e)),
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(JoinedDispatchError(errors))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, TimeZone};

    fn event(topic: &str, env: &str, keyword: &str) -> Event {
        let ts = FixedOffset::east_opt(0).unwrap().with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        let mut e = Event::placeholder(ts);
        e.topic = topic.to_owned();
        e.env = env.to_owned();
        e.project = "proj".to_owned();
        e.keyword = keyword.to_owned();
        e
    }

    fn cfg() -> DispatcherConfig {
        DispatcherConfig {
            hostname: "collector-1".to_owned(),
            ..Default::default()
        }
    }

    #[test]
    fn drops_invalid_event_with_all_empty_classifiers() {
        let ts = FixedOffset::east_opt(0).unwrap().with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        let mut e = Event::placeholder(ts);
        assert_eq!(filter_and_route(&mut e, &cfg()), RouteDecision::Dropped);
    }

    #[test]
    fn drops_ignored_topic() {
        let mut c = cfg();
        c.topic_ignores.insert("debug".to_owned());
        let mut e = event("debug", "test", "");
        assert_eq!(filter_and_route(&mut e, &c), RouteDecision::Dropped);
    }

    #[test]
    fn drops_when_required_keyword_missing() {
        let mut c = cfg();
        c.topic_require_keyword.insert("debug".to_owned());
        let mut e = event("debug", "test", "");
        assert_eq!(filter_and_route(&mut e, &c), RouteDecision::Dropped);
    }

    #[test]
    fn drops_exact_ignored_keyword() {
        let mut c = cfg();
        c.keyword_ignores.insert("noisy".to_owned());
        let mut e = event("debug", "test", "noisy");
        assert_eq!(filter_and_route(&mut e, &c), RouteDecision::Dropped);
    }

    #[test]
    fn rewrites_env_and_topic_then_routes_by_mapped_topic() {
        let mut c = cfg();
        c.env_mappings.insert("staging".to_owned(), "test".to_owned());
        c.topic_mappings.insert("dbg".to_owned(), "debug".to_owned());
        c.priors.insert("debug".to_owned());
        let mut e = event("dbg", "staging", "");
        assert_eq!(filter_and_route(&mut e, &c), RouteDecision::Route(Priority::Prior));
        assert_eq!(e.env, "test");
        assert_eq!(e.topic, "debug");
        assert_eq!(e.via, "collector-1");
    }

    #[test]
    fn routes_standard_when_topic_not_in_priors() {
        let mut e = event("debug", "test", "");
        assert_eq!(filter_and_route(&mut e, &cfg()), RouteDecision::Route(Priority::Standard));
    }

    #[test]
    fn suppresses_root_head_healthcheck_on_x_access() {
        let mut c = cfg();
        c.topic_mappings.insert("x-nginx-access".to_owned(), "x-access".to_owned());
        let mut e = event("x-nginx-access", "test", "");
        e.extra.insert("path".to_owned(), "/".into());
        e.extra.insert("method".to_owned(), "HEAD".into());
        assert_eq!(filter_and_route(&mut e, &c), RouteDecision::Dropped);
    }

    #[test]
    fn does_not_suppress_non_root_path_on_x_access() {
        let mut c = cfg();
        c.topic_mappings.insert("x-nginx-access".to_owned(), "x-access".to_owned());
        let mut e = event("x-nginx-access", "test", "");
        e.extra.insert("path".to_owned(), "/status".into());
        e.extra.insert("method".to_owned(), "HEAD".into());
        assert_eq!(filter_and_route(&mut e, &c), RouteDecision::Route(Priority::Standard));
    }

    #[test]
    fn dispatcher_determinism_same_input_same_decision() {
        let c = cfg();
        let mut e1 = event("debug", "test", "");
        let mut e2 = event("debug", "test", "");
        assert_eq!(filter_and_route(&mut e1, &c), filter_and_route(&mut e2, &c));
        assert_eq!(e1, e2);
    }
}
