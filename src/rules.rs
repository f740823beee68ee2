//! Rule script evaluation
//!
//! A rule script sees the fact record as read-only variables and can act on
//! the message only through the `add(label)` and `remove(label)` host
//! functions. Its return value is ignored. Both take exactly one argument;
//! any two-argument form, including the string, array and map `remove`
//! built-ins, fails the evaluation.
//!
//! ```text
//! let who = fromPart;                // "bob.smith"
//! who.replace(".", "-");             // replace works in place
//! add(who);                          // -> "bob-smith"
//! add(fromDomain);                   // -> "example.com"
//! if "INBOX" in labels && subject.contains("[spam]") { remove("INBOX"); }
//! ```

use rhai::packages::{Package, StandardPackage};
use rhai::{Array, Blob, Dynamic, Engine, EvalAltResult, ImmutableString, Map, Scope, AST, INT};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::{GmailError, Result};
use crate::facts::FactRecord;

/// The two label operations a script may request
pub trait LabelActions: Send + Sync {
    /// Attach the named label; returns whether a request was issued
    fn add_label(&self, name: &str) -> bool;

    /// Detach the named label; returns whether a request was issued
    fn remove_label(&self, name: &str) -> bool;
}

/// Something that can run rules against a fact record
pub trait RuleEvaluator: Send + Sync {
    /// Evaluate once; all effects go through `actions`
    fn evaluate(&self, facts: &FactRecord, actions: Arc<dyn LabelActions>) -> Result<()>;
}

/// Rhai-backed rule evaluator compiled once from a script file
pub struct ScriptEngine {
    ast: AST,
    package: StandardPackage,
    max_operations: u64,
}

impl ScriptEngine {
    /// Compile script source; syntax errors are reported as [`GmailError::ScriptError`]
    pub fn compile(source: &str) -> Result<Self> {
        let package = StandardPackage::new();
        let ast = Self::base_engine(&package).compile(source)?;
        Ok(Self {
            ast,
            package,
            max_operations: 0,
        })
    }

    /// Read and compile the script at `path`
    pub async fn load(path: &Path) -> Result<Self> {
        let source = tokio::fs::read_to_string(path).await.map_err(|e| {
            GmailError::ScriptError(format!("failed to read script {:?}: {}", path, e))
        })?;
        let engine = Self::compile(&source).map_err(|e| match e {
            GmailError::ScriptError(msg) => GmailError::ScriptError(format!("{:?}: {}", path, msg)),
            other => other,
        })?;
        info!("Loaded rule script from {:?}", path);
        Ok(engine)
    }

    /// Limit operations per evaluation; 0 disables the limit
    pub fn with_max_operations(mut self, max_operations: u64) -> Self {
        self.max_operations = max_operations;
        self
    }

    fn base_engine(package: &StandardPackage) -> Engine {
        let mut engine = Engine::new_raw();
        engine.register_global_module(package.as_shared_module());
        engine.on_print(|text| info!("script: {}", text));
        engine.on_debug(|text, _source, pos| debug!("script {:?}: {}", pos, text));
        engine
    }

    /// Engine for one evaluation, with host functions bound to `actions`
    fn evaluation_engine(&self, actions: Arc<dyn LabelActions>) -> Engine {
        let mut engine = Self::base_engine(&self.package);
        engine.set_max_operations(self.max_operations);

        let add_actions = Arc::clone(&actions);
        engine.register_fn("add", move |label: Dynamic| -> bool {
            add_actions.add_label(&label.to_string())
        });
        engine.register_fn("remove", move |label: Dynamic| -> bool {
            actions.remove_label(&label.to_string())
        });
        reject_extra_arguments(&mut engine, "add");
        reject_extra_arguments(&mut engine, "remove");

        engine
    }
}

type HostResult = std::result::Result<bool, Box<EvalAltResult>>;

/// Shadow every two-argument form of `name`
///
/// Engine-level functions are resolved before the standard package, so these
/// win over built-ins such as `remove(string, string)`.
fn reject_extra_arguments(engine: &mut Engine, name: &'static str) {
    fn arity_error(name: &str) -> HostResult {
        Err(format!("{}() takes exactly one label argument", name).into())
    }

    engine
        .register_fn(name, move |_: ImmutableString, _: ImmutableString| arity_error(name))
        .register_fn(name, move |_: ImmutableString, _: char| arity_error(name))
        .register_fn(name, move |_: ImmutableString, _: INT| arity_error(name))
        .register_fn(name, move |_: Array, _: INT| arity_error(name))
        .register_fn(name, move |_: Blob, _: INT| arity_error(name))
        .register_fn(name, move |_: Map, _: ImmutableString| arity_error(name))
        .register_fn(name, move |_: Dynamic, _: Dynamic| arity_error(name));
}

/// Bind the fact record as constants under the names scripts rely on
fn facts_scope(facts: &FactRecord) -> Scope<'static> {
    fn array(values: Vec<String>) -> Array {
        values.into_iter().map(Dynamic::from).collect()
    }

    let view = facts.script_view();
    let mut scope = Scope::new();
    scope
        .push_constant("to", array(view.to))
        .push_constant("toPart", array(view.to_part))
        .push_constant("toDomain", array(view.to_domain))
        .push_constant("from", view.from)
        .push_constant("fromPart", view.from_part)
        .push_constant("fromDomain", view.from_domain)
        .push_constant("subject", view.subject)
        .push_constant("labels", array(view.labels));
    scope
}

impl RuleEvaluator for ScriptEngine {
    fn evaluate(&self, facts: &FactRecord, actions: Arc<dyn LabelActions>) -> Result<()> {
        let engine = self.evaluation_engine(actions);
        let mut scope = facts_scope(facts);
        engine.run_ast_with_scope(&mut scope, &self.ast)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::facts::FactRecordBuilder;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingActions {
        calls: Mutex<Vec<(String, String)>>,
        refuse: bool,
    }

    impl RecordingActions {
        fn calls(&self) -> Vec<(String, String)> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl LabelActions for RecordingActions {
        fn add_label(&self, name: &str) -> bool {
            self.calls
                .lock()
                .unwrap()
                .push(("add".to_string(), name.to_string()));
            !self.refuse
        }

        fn remove_label(&self, name: &str) -> bool {
            self.calls
                .lock()
                .unwrap()
                .push(("remove".to_string(), name.to_string()));
            !self.refuse
        }
    }

    fn sample_facts() -> FactRecord {
        let mut builder = FactRecordBuilder::new();
        builder
            .header("From", "\"Bob Smith\" <bob.smith@example.com>")
            .header("To", "me@home.org, team@work.net")
            .header("Subject", "Quarterly numbers");
        builder.existing_label("INBOX").existing_label("UNREAD");
        builder.build()
    }

    fn run(script: &str) -> (Result<()>, Vec<(String, String)>) {
        let engine = ScriptEngine::compile(script).unwrap();
        let actions = Arc::new(RecordingActions::default());
        let result = engine.evaluate(&sample_facts(), actions.clone());
        (result, actions.calls())
    }

    fn call(op: &str, label: &str) -> (String, String) {
        (op.to_string(), label.to_string())
    }

    #[test]
    fn test_sender_labels() {
        let (result, calls) = run(
            r#"
            let who = fromPart;
            who.replace(".", "-");
            add(who);
            let d = fromDomain;
            d.replace(".", "-");
            add(d);
            "#,
        );

        assert!(result.is_ok());
        assert_eq!(calls, vec![call("add", "bob-smith"), call("add", "example-com")]);
    }

    #[test]
    fn test_recipient_arrays_are_aligned() {
        let (result, calls) = run(
            r#"
            for i in 0..to.len() {
                add(toPart[i] + "@" + toDomain[i] + "=" + to[i]);
            }
            "#,
        );

        assert!(result.is_ok());
        assert_eq!(
            calls,
            vec![
                call("add", "me@home.org=me@home.org"),
                call("add", "team@work.net=team@work.net"),
            ]
        );
    }

    #[test]
    fn test_existing_labels_and_subject() {
        let (result, calls) = run(
            r#"
            if "INBOX" in labels && subject.contains("Quarterly") {
                remove("INBOX");
                add("finance");
            }
            if "STARRED" in labels { add("never"); }
            "#,
        );

        assert!(result.is_ok());
        assert_eq!(calls, vec![call("remove", "INBOX"), call("add", "finance")]);
    }

    #[test]
    fn test_from_variables_exposed() {
        let (result, calls) = run("add(from); add(fromPart); add(fromDomain);");
        assert!(result.is_ok());
        assert_eq!(
            calls,
            vec![
                call("add", "bob.smith@example.com"),
                call("add", "bob.smith"),
                call("add", "example.com"),
            ]
        );
    }

    #[test]
    fn test_non_string_argument_is_stringified() {
        let (result, calls) = run("add(42);");
        assert!(result.is_ok());
        assert_eq!(calls, vec![call("add", "42")]);
    }

    #[test]
    fn test_wrong_arity_is_a_script_error() {
        let (result, calls) = run("add();");
        assert!(matches!(result, Err(GmailError::ScriptError(_))));
        assert!(calls.is_empty());

        let (result, calls) = run(r#"remove("a", "b");"#);
        assert!(matches!(result, Err(GmailError::ScriptError(_))));
        assert!(calls.is_empty());
    }

    #[test]
    fn test_two_argument_forms_do_not_reach_builtins() {
        for script in [
            r#"let r = remove("INBOX", "X");"#,
            r#"remove("INBOX", 'X');"#,
            r#"let a = [1, 2]; remove(a, 0);"#,
            r#"remove(#{a: 1}, "a");"#,
            r#"add(subject, 1.5);"#,
            r#"let s = "INBOX"; s.remove("X");"#,
        ] {
            let (result, calls) = run(script);
            match result {
                Err(GmailError::ScriptError(msg)) => {
                    assert!(msg.contains("exactly one label argument"), "{}: {}", script, msg)
                }
                other => panic!("{}: expected script error, got {:?}", script, other),
            }
            assert!(calls.is_empty(), "{}", script);
        }
    }

    #[test]
    fn test_calls_before_failure_are_kept() {
        let (result, calls) = run(r#"add("first"); throw "boom"; add("never");"#);
        assert!(matches!(result, Err(GmailError::ScriptError(_))));
        assert_eq!(calls, vec![call("add", "first")]);
    }

    #[test]
    fn test_return_value_ignored() {
        let (result, calls) = run(r#"add("x"); false"#);
        assert!(result.is_ok());
        assert_eq!(calls, vec![call("add", "x")]);
    }

    #[test]
    fn test_host_functions_report_status() {
        let engine = ScriptEngine::compile(
            r#"if !add("x") { remove("fallback"); }"#,
        )
        .unwrap();
        let actions = Arc::new(RecordingActions {
            refuse: true,
            ..Default::default()
        });

        engine.evaluate(&sample_facts(), actions.clone()).unwrap();
        assert_eq!(actions.calls(), vec![call("add", "x"), call("remove", "fallback")]);
    }

    #[test]
    fn test_facts_are_read_only() {
        let (result, _) = run(r#"from = "spoofed@example.com";"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_max_operations_stops_runaway_script() {
        let engine = ScriptEngine::compile("loop { }")
            .unwrap()
            .with_max_operations(1_000);
        let actions = Arc::new(RecordingActions::default());

        let result = engine.evaluate(&sample_facts(), actions);
        assert!(matches!(result, Err(GmailError::ScriptError(_))));
    }

    #[test]
    fn test_compile_error() {
        let result = ScriptEngine::compile("if (");
        assert!(matches!(result, Err(GmailError::ScriptError(_))));
    }

    #[test]
    fn test_each_evaluation_gets_its_own_actions() {
        let engine = ScriptEngine::compile(r#"add(subject);"#).unwrap();
        let first = Arc::new(RecordingActions::default());
        let second = Arc::new(RecordingActions::default());

        engine.evaluate(&sample_facts(), first.clone()).unwrap();
        engine
            .evaluate(&FactRecordBuilder::new().build(), second.clone())
            .unwrap();

        assert_eq!(first.calls(), vec![call("add", "Quarterly numbers")]);
        assert_eq!(second.calls(), vec![call("add", "")]);
    }

    #[tokio::test]
    async fn test_load_missing_script() {
        let result = ScriptEngine::load(Path::new("/nonexistent/labeller.rhai")).await;
        assert!(matches!(result, Err(GmailError::ScriptError(_))));
    }

    #[tokio::test]
    async fn test_load_from_file() {
        let file = tempfile::NamedTempFile::new().unwrap();
        tokio::fs::write(file.path(), "add(fromDomain);").await.unwrap();

        let engine = ScriptEngine::load(file.path()).await.unwrap();
        let actions = Arc::new(RecordingActions::default());
        engine.evaluate(&sample_facts(), actions.clone()).unwrap();

        assert_eq!(actions.calls(), vec![call("add", "example.com")]);
    }
}
