//! The `build.toml` build description
//!
//! ```toml
//! [plans]
//! lib = "../lib"
//! tools = { git = "https://example.com/tools.git#v2", path = "cc" }
//!
//! [jobs.main_o]
//! inputs = ["src/main.c"]
//! command = "cc -c {inputs} -o {out} -MD -MF {depfile}"
//! output = "main.o"
//! depfile = "main.d"
//!
//! [jobs.app]
//! deps = ["main_o", "lib:archive"]
//! command = "cc {deps} -o {out}"
//! output = "app"
//!
//! [tasks]
//! all = ["app"]
//! ```
//!
//! `output` and `depfile` are relative to the plan's build directory,
//! `inputs` and `cwd` to the plan directory. A job without a command
//! resolves to the list of its dependency values.

use super::Plan;
use crate::error::{RmkError, RmkResult};
use crate::job::{Dep, Value, WorkContext};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Reference to another build description
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum PlanImport {
    /// Path relative to the importing plan's directory
    Path(String),
    /// Directory inside a git repository, `url#ref`
    Git {
        git: String,
        #[serde(default)]
        path: Option<String>,
    },
}

/// One `[jobs.NAME]` table
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct JobSpec {
    /// Source files or glob patterns
    pub inputs: Vec<String>,
    /// Jobs or tasks whose results feed this job
    pub deps: Vec<String>,
    /// Jobs or tasks that must finish first but are not inputs
    pub includes: Vec<String>,
    pub command: Option<String>,
    pub output: Option<String>,
    /// Make style dependency file written by the command
    pub depfile: Option<String>,
    pub cwd: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BuildFile {
    plans: BTreeMap<String, PlanImport>,
    jobs: BTreeMap<String, JobSpec>,
    tasks: BTreeMap<String, Vec<String>>,
}

impl BuildFile {
    pub fn parse(text: &str, path: &Path) -> RmkResult<Self> {
        let invalid = |reason: String| RmkError::PlanInvalid {
            path: path.to_path_buf(),
            reason,
        };
        let build: BuildFile = toml::from_str(text).map_err(|e| invalid(e.to_string()))?;

        if let Some(name) = build.tasks.keys().find(|name| build.jobs.contains_key(*name)) {
            return Err(invalid(format!("'{}' is both a job and a task", name)));
        }
        for reference in build
            .jobs
            .values()
            .flat_map(|job| job.deps.iter().chain(&job.includes))
            .chain(build.tasks.values().flatten())
        {
            if let Some((alias, _)) = reference.split_once(':') {
                if !build.plans.contains_key(alias) {
                    return Err(invalid(format!("'{}' refers to unknown plan '{}'", reference, alias)));
                }
            }
        }
        Ok(build)
    }

    pub fn imports(&self) -> &BTreeMap<String, PlanImport> {
        &self.plans
    }

    pub fn jobs(&self) -> &BTreeMap<String, JobSpec> {
        &self.jobs
    }

    /// Register every job and task with `plan`. Each job is also a task
    /// of the same name.
    pub fn register(&self, plan: &Plan) {
        for (name, spec) in &self.jobs {
            let job_name = name.clone();
            let spec = Arc::new(spec.clone());
            plan.register_task(name, move |plan| {
                Ok(vec![spec.instantiate(&job_name, plan)?.into()])
            });
        }
        for (name, refs) in &self.tasks {
            let refs = refs.clone();
            plan.register_task(name, move |plan| {
                let mut deps = Vec::new();
                for reference in &refs {
                    deps.extend(resolve_ref(plan, reference)?);
                }
                Ok(deps)
            });
        }
    }
}

/// `name` from this plan, or `alias:name` from an imported one
fn resolve_ref(plan: &Plan, reference: &str) -> RmkResult<Vec<Dep>> {
    match reference.split_once(':') {
        Some((alias, name)) => plan.project(alias)?.task(name),
        None => plan.task(reference),
    }
}

fn is_pattern(input: &str) -> bool {
    input.contains(['*', '?', '['])
}

/// Resolved shape of a command job
#[derive(Debug, Clone)]
struct Action {
    command: Option<String>,
    inputs: usize,
    output: Option<PathBuf>,
    depfile: Option<PathBuf>,
    cwd: PathBuf,
}

impl JobSpec {
    fn instantiate(&self, name: &str, plan: &Plan) -> RmkResult<crate::job::Job> {
        let mut depends: Vec<Dep> = Vec::new();
        for input in &self.inputs {
            if is_pattern(input) {
                let found = plan.glob(input)?;
                if found.is_empty() {
                    debug!("{}: '{}' matches nothing", name, input);
                }
                depends.extend(found.into_iter().map(Dep::from));
            } else {
                depends.push(plan.file(input).into());
            }
        }
        let inputs = depends.len();
        for reference in &self.deps {
            depends.extend(resolve_ref(plan, reference)?);
        }
        let mut includes = Vec::new();
        for reference in &self.includes {
            includes.extend(resolve_ref(plan, reference)?);
        }

        let action = Arc::new(Action {
            command: self.command.clone(),
            inputs,
            output: self.output.as_ref().map(|o| plan.build_dir().join(o)),
            depfile: self.depfile.as_ref().map(|d| plan.build_dir().join(d)),
            cwd: match &self.cwd {
                Some(cwd) => plan.file(cwd),
                None => plan.dir().to_path_buf(),
            },
        });
        plan.job_with_includes(name, depends, includes, move |ctx| {
            run_action(action.clone(), ctx)
        })
    }
}

async fn run_action(action: Arc<Action>, ctx: WorkContext) -> RmkResult<Value> {
    let Some(template) = &action.command else {
        return Ok(Value::List(ctx.args));
    };
    for path in action.output.iter().chain(&action.depfile) {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| RmkError::io(format!("creating {}", parent.display()), e))?;
        }
    }

    let split = action.inputs.min(ctx.args.len());
    let (inputs, deps) = ctx.args.split_at(split);
    let command = expand(
        template,
        &[
            ("{inputs}", join_values(inputs)),
            ("{deps}", join_values(deps)),
            ("{out}", join_path(action.output.as_deref())),
            ("{depfile}", join_path(action.depfile.as_deref())),
        ],
    );
    let stdout = ctx.runner.system(command, Some(&action.cwd)).await?;

    if let Some(depfile) = &action.depfile {
        match tokio::fs::read_to_string(depfile).await {
            Ok(text) => ctx.implicit.extend(
                parse_depfile(&text)
                    .into_iter()
                    .map(|dep| action.cwd.join(dep).display().to_string()),
            ),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("{} wrote no {}", ctx.job, depfile.display());
            }
            Err(e) => return Err(RmkError::io(format!("reading {}", depfile.display()), e)),
        }
    }

    Ok(match &action.output {
        Some(output) => Value::from(output.as_path()),
        None => Value::Str(stdout),
    })
}

fn expand(template: &str, placeholders: &[(&str, String)]) -> String {
    placeholders
        .iter()
        .fold(template.to_string(), |text, (key, value)| text.replace(key, value))
}

fn join_values(values: &[Value]) -> String {
    values
        .iter()
        .flat_map(Value::flatten)
        .map(|v| quote(&v.identity()))
        .collect::<Vec<_>>()
        .join(" ")
}

fn join_path(path: Option<&Path>) -> String {
    path.map(|p| quote(&p.display().to_string()))
        .unwrap_or_default()
}

/// Single-quote `word` for `sh` if it contains anything unusual
fn quote(word: &str) -> String {
    let plain = !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "/._-+=:,@%".contains(c));
    if plain {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', r"'\''"))
    }
}

/// Prerequisites listed in a make style dependency file, in order of
/// first appearance
pub fn parse_depfile(text: &str) -> Vec<String> {
    let joined = text.replace("\\\r\n", " ").replace("\\\n", " ");
    let mut found: Vec<String> = Vec::new();
    for line in joined.lines() {
        let line = line.trim_start();
        if line.starts_with('#') {
            continue;
        }
        let Some((_, prerequisites)) = line.split_once(':') else {
            continue;
        };
        for word in split_words(prerequisites) {
            if !found.contains(&word) {
                found.push(word);
            }
        }
    }
    found
}

/// Split on whitespace, honouring `\ ` escapes
fn split_words(text: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' if chars.peek() == Some(&' ') => {
                current.push(' ');
                chars.next();
            }
            c if c.is_whitespace() => {
                if !current.is_empty() {
                    words.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }
    if !current.is_empty() {
        words.push(current);
    }
    words
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::tests::quiet_scheduler;
    use crate::policy::{AlwaysPolicy, BuildPolicy};
    use tempfile::TempDir;

    fn load(dir: &Path, text: &str) -> Plan {
        let path = dir.join("build.toml");
        let plan = Plan::new(&path, text);
        BuildFile::parse(text, &path).unwrap().register(&plan);
        plan
    }

    #[test]
    fn depfile_prerequisites() {
        let text = "out/a.o: src/a.c include/a.h \\\n  include/b\\ c.h\ninclude/a.h:\n";
        assert_eq!(
            parse_depfile(text),
            vec!["src/a.c", "include/a.h", "include/b c.h"]
        );
    }

    #[test]
    fn imports_accept_paths_and_git() {
        let text = r#"
[plans]
lib = "../lib"
tools = { git = "https://example.com/tools.git#v2", path = "cc" }
"#;
        let build = BuildFile::parse(text, Path::new("build.toml")).unwrap();
        assert_eq!(build.imports()["lib"], PlanImport::Path("../lib".into()));
        assert_eq!(
            build.imports()["tools"],
            PlanImport::Git {
                git: "https://example.com/tools.git#v2".into(),
                path: Some("cc".into())
            }
        );
    }

    #[test]
    fn rejects_bad_descriptions() {
        let path = Path::new("build.toml");
        assert!(BuildFile::parse("[jobs.a]\nbogus = 1\n", path).is_err());
        assert!(BuildFile::parse("[jobs.a]\n[tasks]\na = []\n", path).is_err());
        let err = BuildFile::parse("[tasks]\nall = [\"lib:x\"]\n", path).unwrap_err();
        assert!(err.to_string().contains("unknown plan 'lib'"));
    }

    #[test]
    fn quoting() {
        assert_eq!(quote("/src/a.c"), "/src/a.c");
        assert_eq!(quote("my file.c"), "'my file.c'");
        assert_eq!(quote("it's"), r"'it'\''s'");
    }

    #[tokio::test]
    async fn jobs_run_commands() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("hello.txt"), "hello\n").unwrap();
        let plan = load(
            dir.path(),
            r#"
[jobs.copy]
inputs = ["*.txt"]
command = "cp {inputs} {out}"
output = "copy.txt"

[jobs.shout]
deps = ["copy"]
command = "tr a-z A-Z < {deps}"

[tasks]
all = ["shout"]
"#,
        );

        let deps = plan.task("all").unwrap();
        let values = AlwaysPolicy::new(quiet_scheduler(2)).build(&deps).await.unwrap();
        assert_eq!(values, vec![Value::from("HELLO\n")]);
        assert_eq!(
            std::fs::read_to_string(dir.path().join(".rmk/copy.txt")).unwrap(),
            "hello\n"
        );
    }

    #[tokio::test]
    async fn depfile_feeds_implicit_dependencies() {
        let dir = TempDir::new().unwrap();
        let plan = load(
            dir.path(),
            r#"
[jobs.gen]
command = "echo 'gen.out: a.h b.h' > {depfile}"
depfile = "gen.d"
"#,
        );

        let deps = plan.task("gen").unwrap();
        AlwaysPolicy::new(quiet_scheduler(1)).build(&deps).await.unwrap();
        let implicit = deps[0].as_job().unwrap().implicit_dependencies();
        assert!(implicit.contains(&dir.path().join("a.h").display().to_string()));
        assert!(implicit.contains(&dir.path().join("b.h").display().to_string()));
    }

    #[tokio::test]
    async fn commandless_job_groups_dependencies() {
        let dir = TempDir::new().unwrap();
        let plan = load(
            dir.path(),
            r#"
[jobs.one]
command = "printf 1"

[jobs.two]
command = "printf 2"

[jobs.both]
deps = ["one", "two"]
"#,
        );
        let deps = plan.task("both").unwrap();
        let values = AlwaysPolicy::new(quiet_scheduler(4)).build(&deps).await.unwrap();
        assert_eq!(
            values,
            vec![Value::List(vec![Value::from("1"), Value::from("2")])]
        );
    }
}
