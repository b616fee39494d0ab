//! Trainer command line construction

use crate::config::SupervisorConfig;
use crate::constants::invocation::NUM_ENVS_FLAG;
use crate::constants::layout::RESULTS_NAME;
use crate::models::{LaunchMode, Run};
use serde_json::Value;
use std::collections::BTreeMap;

/// Flags the supervisor owns; snapshot values for these are ignored
const RESERVED_FLAGS: [&str; 7] = [
    "run_id",
    "results_dir",
    "env",
    "base_port",
    NUM_ENVS_FLAG,
    "resume",
    "force",
];

/// A fully resolved process invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
}

impl Invocation {
    /// Shell-style rendering recorded on the run and in the log header
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .map(quote)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

fn quote(part: &str) -> String {
    if part.is_empty() || part.contains(char::is_whitespace) {
        format!("'{}'", part.replace('\'', r"'\''"))
    } else {
        part.to_string()
    }
}

#[derive(Debug, Clone)]
pub struct InvocationBuilder {
    resume_flag: String,
    force_flag: String,
    extra_env: BTreeMap<String, String>,
}

impl InvocationBuilder {
    pub fn new(config: &SupervisorConfig) -> Self {
        Self {
            resume_flag: config.resume_flag.clone(),
            force_flag: config.force_flag.clone(),
            extra_env: config.extra_env.clone(),
        }
    }

    /// Build the invocation for one attempt of `run`
    ///
    /// The snapshot is read, never modified; the mode only adds a flag.
    pub fn build(&self, run: &Run, mode: LaunchMode, base_port: u16) -> Invocation {
        let snapshot = run.snapshot();
        let paths = run.paths();

        let mut args = vec![
            paths.config_path.display().to_string(),
            format!("--run-id={RESULTS_NAME}"),
            format!("--results-dir={}", paths.run_dir.display()),
        ];
        if let Some(env_path) = &snapshot.environment_path {
            args.push(format!("--env={}", env_path.display()));
        }
        args.push(format!("--base-port={base_port}"));
        args.push(format!("--num-envs={}", snapshot.num_envs()));

        for (key, value) in &snapshot.cli_flags {
            if RESERVED_FLAGS.contains(&key.replace('-', "_").as_str()) {
                continue;
            }
            if let Some(arg) = render_flag(key, value) {
                args.push(arg);
            }
        }

        match mode {
            LaunchMode::Fresh => {}
            LaunchMode::Resume => args.push(self.resume_flag.clone()),
            LaunchMode::Force => args.push(self.force_flag.clone()),
        }

        let mut env = self.extra_env.clone();
        env.extend(snapshot.extra_env.clone());

        Invocation {
            program: snapshot.trainer_program.clone(),
            args,
            env,
        }
    }
}

fn render_flag(key: &str, value: &Value) -> Option<String> {
    let flag = format!("--{}", key.replace('_', "-"));
    match value {
        Value::Null | Value::Bool(false) => None,
        Value::Bool(true) => Some(flag),
        Value::String(s) => Some(format!("{flag}={s}")),
        Value::Number(n) => Some(format!("{flag}={n}")),
        other => Some(format!("{flag}={other}")),
    }
}
