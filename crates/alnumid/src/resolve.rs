use crate::{Error, Result};
use core::{future::Future, time::Duration};
use std::collections::{HashMap, HashSet};
use tracing::{info, warn};

/// What the lookup collaborator reported for one token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// The token now has a short link.
    Resolved(String),
    /// The service answered without a link.
    Missing,
    /// The call for this token failed.
    Failed(String),
}

/// Resolves tokens to short links.
///
/// Implementations rate-limit their own outbound calls. A token absent from
/// the returned map counts as unresolved, exactly like [`Resolution::Missing`].
pub trait LinkResolver: Send + Sync {
    fn resolve(
        &self,
        tokens: &[String],
    ) -> impl Future<Output = HashMap<String, Resolution>> + Send;
}

/// How persistently [`Reconciler`] retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcilePolicy {
    /// Give up after this many passes. `None` retries until every token
    /// resolves.
    pub max_passes: Option<u32>,
    /// Pause after a pass that resolved nothing.
    pub stall_backoff: Duration,
}

impl Default for ReconcilePolicy {
    fn default() -> Self {
        Self {
            max_passes: None,
            stall_backoff: Duration::from_secs(5),
        }
    }
}

/// Drives a [`LinkResolver`] until every token has a link.
///
/// Each pass sends only the still-unresolved tokens. Per-token failures are
/// logged and retried on the next pass; they never abort reconciliation.
pub struct Reconciler<R> {
    resolver: R,
    policy: ReconcilePolicy,
}

impl<R: LinkResolver> Reconciler<R> {
    pub const fn new(resolver: R, policy: ReconcilePolicy) -> Self {
        Self { resolver, policy }
    }

    pub const fn policy(&self) -> &ReconcilePolicy {
        &self.policy
    }

    /// Returns a link for every token in `tokens`.
    ///
    /// `known` seeds the mapping; tokens already present in it are never sent
    /// out, so reconciling a fully resolved set makes no calls at all.
    #[tracing::instrument(level = "debug", skip_all, fields(tokens = tokens.len()))]
    pub async fn reconcile(
        &self,
        tokens: &[String],
        mut known: HashMap<String, String>,
    ) -> Result<HashMap<String, String>> {
        known.retain(|_, link| !link.is_empty());
        let mut pending = unresolved(tokens, &known);
        let mut passes = 0_u32;

        while !pending.is_empty() {
            if self.policy.max_passes.is_some_and(|max| passes >= max) {
                warn!(unresolved = pending.len(), passes, "giving up on reconciliation");
                return Err(Error::ResolutionStalled {
                    unresolved: pending.len(),
                    passes,
                });
            }
            passes += 1;

            let before = pending.len();
            let results = self.resolver.resolve(&pending).await;
            for token in &pending {
                match results.get(token) {
                    Some(Resolution::Resolved(link)) if !link.is_empty() => {
                        known.insert(token.clone(), link.clone());
                    }
                    Some(Resolution::Failed(reason)) => {
                        warn!(%token, %reason, pass = passes, "lookup failed, retrying next pass");
                    }
                    _ => warn!(%token, pass = passes, "short link not received"),
                }
            }
            pending = unresolved(&pending, &known);

            info!(
                pass = passes,
                resolved = before - pending.len(),
                unresolved = pending.len(),
                "reconciliation pass finished"
            );
            if pending.len() == before && !pending.is_empty() {
                warn!(
                    unresolved = pending.len(),
                    backoff_ms = self.policy.stall_backoff.as_millis() as u64,
                    "reconciliation made no progress"
                );
                tokio::time::sleep(self.policy.stall_backoff).await;
            }
        }

        Ok(known)
    }
}

/// Tokens without a link, deduplicated, in input order.
fn unresolved(tokens: &[String], known: &HashMap<String, String>) -> Vec<String> {
    let mut seen = HashSet::with_capacity(tokens.len());
    tokens
        .iter()
        .filter(|t| !known.contains_key(*t) && seen.insert(t.as_str()))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    /// Replays one scripted answer per call and records what was asked.
    #[derive(Default)]
    struct Scripted {
        answers: Mutex<VecDeque<HashMap<String, Resolution>>>,
        calls: Mutex<Vec<Vec<String>>>,
    }

    impl Scripted {
        fn new(answers: Vec<Vec<(&str, Resolution)>>) -> Self {
            let answers = answers
                .into_iter()
                .map(|pass| pass.into_iter().map(|(t, r)| (t.to_owned(), r)).collect())
                .collect();
            Self {
                answers: Mutex::new(answers),
                calls: Mutex::default(),
            }
        }
    }

    impl LinkResolver for Scripted {
        async fn resolve(&self, tokens: &[String]) -> HashMap<String, Resolution> {
            self.calls.lock().push(tokens.to_vec());
            self.answers.lock().pop_front().unwrap_or_default()
        }
    }

    fn tokens(ts: &[&str]) -> Vec<String> {
        ts.iter().map(|t| (*t).to_owned()).collect()
    }

    fn link(s: &str) -> Resolution {
        Resolution::Resolved(s.to_owned())
    }

    fn fast() -> ReconcilePolicy {
        ReconcilePolicy {
            max_passes: None,
            stall_backoff: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn retries_only_unresolved_tokens() {
        let resolver = Scripted::new(vec![
            vec![
                ("a", link("https://l/a")),
                ("b", Resolution::Missing),
                ("c", Resolution::Failed("timeout".into())),
            ],
            vec![("b", link("https://l/b"))],
            vec![("c", link("https://l/c"))],
        ]);
        let reconciler = Reconciler::new(resolver, fast());

        let links = reconciler
            .reconcile(&tokens(&["a", "b", "c"]), HashMap::new())
            .await
            .unwrap();

        assert_eq!(links.len(), 3);
        assert_eq!(links["c"], "https://l/c");
        let calls = reconciler.resolver.calls.lock().clone();
        assert_eq!(
            calls,
            vec![tokens(&["a", "b", "c"]), tokens(&["b", "c"]), tokens(&["c"])]
        );
    }

    #[tokio::test]
    async fn omitted_and_empty_links_stay_unresolved() {
        let resolver = Scripted::new(vec![
            vec![("a", link(""))],
            vec![("a", link("https://l/a"))],
        ]);
        let reconciler = Reconciler::new(resolver, fast());
        let links = reconciler
            .reconcile(&tokens(&["a"]), HashMap::new())
            .await
            .unwrap();
        assert_eq!(links["a"], "https://l/a");
        assert_eq!(reconciler.resolver.calls.lock().len(), 2);
    }

    #[tokio::test]
    async fn fully_resolved_input_makes_no_calls() {
        let reconciler = Reconciler::new(Scripted::default(), fast());
        let known: HashMap<_, _> = [("a".to_owned(), "https://l/a".to_owned())].into();

        let links = reconciler
            .reconcile(&tokens(&["a", "a"]), known.clone())
            .await
            .unwrap();
        assert_eq!(links, known);
        assert!(reconciler.resolver.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn bounded_policy_reports_stall() {
        let reconciler = Reconciler::new(
            Scripted::default(),
            ReconcilePolicy {
                max_passes: Some(2),
                stall_backoff: Duration::from_millis(1),
            },
        );
        let err = reconciler
            .reconcile(&tokens(&["a", "b"]), HashMap::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::ResolutionStalled {
                unresolved: 2,
                passes: 2
            }
        ));
    }

    #[tokio::test]
    async fn duplicate_tokens_are_sent_once() {
        let resolver = Scripted::new(vec![vec![("a", link("https://l/a"))]]);
        let reconciler = Reconciler::new(resolver, fast());
        reconciler
            .reconcile(&tokens(&["a", "a"]), HashMap::new())
            .await
            .unwrap();
        assert_eq!(reconciler.resolver.calls.lock()[0], tokens(&["a"]));
    }
}
