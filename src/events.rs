//! Build hooks.
//!
//! Each hook point has its own callback signature. Callbacks run on the
//! coordinating thread in registration order and receive the current
//! [`BuildPhase`].
//!
//! | Hook                | Called                                   | Returns                  |
//! |---------------------|------------------------------------------|--------------------------|
//! | `purge-doc`         | before a document's state is cleared     | -                        |
//! | `get-outdated`      | after staleness detection                | extra changed docnames   |
//! | `before-read-docs`  | before reading, with the sorted read list| (edits the list)         |
//! | `env-updated`       | after reading                            | extra docnames to write  |
//! | `check-consistency` | after the built-in consistency checks    | -                        |
//! | `write-started`     | before the first document is written     | -                        |

use crate::{
    build::BuildPhase,
    environment::{BuildEnvironment, Outdated},
    error::BuildError,
    logger::WarningSink,
};
use educe::Educe;

type PurgeDoc = Box<dyn Fn(BuildPhase, &BuildEnvironment, &str) + Send + Sync>;
type GetOutdated = Box<dyn Fn(BuildPhase, &BuildEnvironment, &Outdated) -> Vec<String> + Send + Sync>;
type BeforeReadDocs = Box<dyn Fn(BuildPhase, &BuildEnvironment, &mut Vec<String>) + Send + Sync>;
type EnvUpdated = Box<dyn Fn(BuildPhase, &BuildEnvironment) -> Vec<String> + Send + Sync>;
type CheckConsistency =
    Box<dyn Fn(BuildPhase, &BuildEnvironment, &WarningSink) -> Result<(), BuildError> + Send + Sync>;
type WriteStarted = Box<dyn Fn(BuildPhase) + Send + Sync>;

#[derive(Educe)]
#[educe(Default)]
pub struct Hooks {
    purge_doc: Vec<PurgeDoc>,
    get_outdated: Vec<GetOutdated>,
    before_read_docs: Vec<BeforeReadDocs>,
    env_updated: Vec<EnvUpdated>,
    check_consistency: Vec<CheckConsistency>,
    write_started: Vec<WriteStarted>,

    /// Cleared when a registered extension can't read in parallel.
    #[educe(Default = true)]
    pub parallel_read_safe: bool,

    /// Cleared when a registered extension can't write in parallel.
    #[educe(Default = true)]
    pub parallel_write_safe: bool,
}

impl Hooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_purge_doc<F>(&mut self, hook: F) -> &mut Self
    where
        F: Fn(BuildPhase, &BuildEnvironment, &str) + Send + Sync + 'static,
    {
        self.purge_doc.push(Box::new(hook));
        self
    }

    pub fn on_get_outdated<F>(&mut self, hook: F) -> &mut Self
    where
        F: Fn(BuildPhase, &BuildEnvironment, &Outdated) -> Vec<String> + Send + Sync + 'static,
    {
        self.get_outdated.push(Box::new(hook));
        self
    }

    pub fn on_before_read_docs<F>(&mut self, hook: F) -> &mut Self
    where
        F: Fn(BuildPhase, &BuildEnvironment, &mut Vec<String>) + Send + Sync + 'static,
    {
        self.before_read_docs.push(Box::new(hook));
        self
    }

    pub fn on_env_updated<F>(&mut self, hook: F) -> &mut Self
    where
        F: Fn(BuildPhase, &BuildEnvironment) -> Vec<String> + Send + Sync + 'static,
    {
        self.env_updated.push(Box::new(hook));
        self
    }

    pub fn on_check_consistency<F>(&mut self, hook: F) -> &mut Self
    where
        F: Fn(BuildPhase, &BuildEnvironment, &WarningSink) -> Result<(), BuildError>
            + Send
            + Sync
            + 'static,
    {
        self.check_consistency.push(Box::new(hook));
        self
    }

    pub fn on_write_started<F>(&mut self, hook: F) -> &mut Self
    where
        F: Fn(BuildPhase) + Send + Sync + 'static,
    {
        self.write_started.push(Box::new(hook));
        self
    }

    // ========================================================================
    // Emitting
    // ========================================================================

    pub fn emit_purge_doc(&self, phase: BuildPhase, env: &BuildEnvironment, docname: &str) {
        for hook in &self.purge_doc {
            hook(phase, env, docname);
        }
    }

    /// Union of the docnames every `get-outdated` hook returned.
    pub fn emit_get_outdated(
        &self,
        phase: BuildPhase,
        env: &BuildEnvironment,
        outdated: &Outdated,
    ) -> Vec<String> {
        self.get_outdated
            .iter()
            .flat_map(|hook| hook(phase, env, outdated))
            .collect()
    }

    pub fn emit_before_read_docs(
        &self,
        phase: BuildPhase,
        env: &BuildEnvironment,
        docnames: &mut Vec<String>,
    ) {
        for hook in &self.before_read_docs {
            hook(phase, env, docnames);
        }
    }

    pub fn emit_env_updated(&self, phase: BuildPhase, env: &BuildEnvironment) -> Vec<String> {
        self.env_updated
            .iter()
            .flat_map(|hook| hook(phase, env))
            .collect()
    }

    pub fn emit_check_consistency(
        &self,
        phase: BuildPhase,
        env: &BuildEnvironment,
        warnings: &WarningSink,
    ) -> Result<(), BuildError> {
        self.check_consistency
            .iter()
            .try_for_each(|hook| hook(phase, env, warnings))
    }

    pub fn emit_write_started(&self, phase: BuildPhase) {
        for hook in &self.write_started {
            hook(phase);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_defaults_are_parallel_safe() {
        let hooks = Hooks::new();
        assert!(hooks.parallel_read_safe);
        assert!(hooks.parallel_write_safe);
    }

    #[test]
    fn test_hooks_run_in_registration_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut hooks = Hooks::new();
        for tag in ["first", "second"] {
            let seen = Arc::clone(&seen);
            hooks.on_purge_doc(move |phase, _, docname| {
                seen.lock().unwrap().push(format!("{tag}:{phase}:{docname}"));
            });
        }

        hooks.emit_purge_doc(BuildPhase::Reading, &BuildEnvironment::new(), "old");
        assert_eq!(
            *seen.lock().unwrap(),
            ["first:reading:old", "second:reading:old"]
        );
    }

    #[test]
    fn test_returned_docnames_are_collected() {
        let mut hooks = Hooks::new();
        hooks
            .on_get_outdated(|_, _, _| vec!["a".into()])
            .on_get_outdated(|_, _, outdated| outdated.removed.iter().cloned().collect())
            .on_env_updated(|phase, _| vec![phase.to_string()]);

        let outdated = Outdated {
            removed: ["gone".to_owned()].into(),
            ..Outdated::default()
        };
        let env = BuildEnvironment::new();
        assert_eq!(
            hooks.emit_get_outdated(BuildPhase::Reading, &env, &outdated),
            ["a", "gone"]
        );
        assert_eq!(hooks.emit_env_updated(BuildPhase::Reading, &env), ["reading"]);
    }

    #[test]
    fn test_before_read_docs_edits_list() {
        let mut hooks = Hooks::new();
        hooks.on_before_read_docs(|_, _, docnames| {
            docnames.reverse();
            docnames.push("extra".into());
        });

        let mut docnames = vec!["a".to_owned(), "b".to_owned()];
        hooks.emit_before_read_docs(BuildPhase::Reading, &BuildEnvironment::new(), &mut docnames);
        assert_eq!(docnames, ["b", "a", "extra"]);
    }

    #[test]
    fn test_check_consistency_failure_propagates() {
        let mut hooks = Hooks::new();
        hooks.on_check_consistency(|_, _, warnings| warnings.warn(None, "extension says no"));

        let env = BuildEnvironment::new();
        let fatal = WarningSink::new(true);
        let result = hooks.emit_check_consistency(BuildPhase::ConsistencyCheck, &env, &fatal);
        assert!(matches!(result, Err(BuildError::Warning { .. })));
    }
}
