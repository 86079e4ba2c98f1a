//! Wrapping user steps in the entrypoint binary.
//!
//! Each wrapped step runs `/tools/entrypoint`, which reads its real command
//! from `ENTRYPOINT_OPTIONS`, waits for the previous step's marker file and
//! writes its own when done. That is what serializes steps inside one
//! workload. The JSON shape below is a wire contract with that binary.

use serde::Serialize;

use taskrun_core::{Container, Step};

use super::{AssemblyError, TOOLS_DIR, TOOLS_VOLUME};
use crate::config::Config;

/// Path of the entrypoint binary inside the tools volume.
pub const ENTRYPOINT_BIN: &str = "/tools/entrypoint";

/// Where the entrypoint image keeps its binary.
const ENTRYPOINT_SOURCE: &str = "/entrypoint";

/// Environment variable carrying the JSON options.
pub const ENTRYPOINT_OPTIONS_ENV: &str = "ENTRYPOINT_OPTIONS";

pub const PROCESS_LOG: &str = "/tools/process-log.txt";
pub const MARKER_FILE: &str = "/tools/marker-file.txt";

/// Name of the step that installs the entrypoint binary.
pub const PLACE_TOOLS_STEP: &str = "place-tools";

#[derive(Debug, Serialize)]
struct EntrypointOptions<'a> {
    args: Vec<&'a str>,
    process_log: &'a str,
    marker_file: &'a str,
}

/// JSON options for running `command` + `args` under the entrypoint.
pub fn options_json(command: &[String], args: &[String]) -> Result<String, AssemblyError> {
    let options = EntrypointOptions {
        args: command.iter().chain(args).map(String::as_str).collect(),
        process_log: PROCESS_LOG,
        marker_file: MARKER_FILE,
    };
    serde_json::to_string(&options).map_err(|e| AssemblyError::Serialization(e.to_string()))
}

/// The step that copies the entrypoint binary into the tools volume.
pub fn copy_step(config: &Config) -> Container {
    Container::new(PLACE_TOOLS_STEP, &config.entrypoint_image)
        .with_command(["/bin/cp"])
        .with_args([ENTRYPOINT_SOURCE, ENTRYPOINT_BIN])
        .with_mount(TOOLS_VOLUME, TOOLS_DIR)
}

/// Rewrite a user step to run under the entrypoint binary.
pub fn wrap_step(mut step: Step) -> Result<Container, AssemblyError> {
    let options = options_json(&step.command, &step.args)?;
    step.command = vec![ENTRYPOINT_BIN.to_string()];
    step.args.clear();
    step = step
        .with_env(ENTRYPOINT_OPTIONS_ENV, options)
        .with_mount(TOOLS_VOLUME, TOOLS_DIR);
    Ok(step)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_json_is_exact() {
        let json = options_json(&["/mycmd".to_string()], &[]).unwrap();
        assert_eq!(
            json,
            r#"{"args":["/mycmd"],"process_log":"/tools/process-log.txt","marker_file":"/tools/marker-file.txt"}"#
        );
    }

    #[test]
    fn test_wrap_step_moves_command_into_options() {
        let step = Step::new("foo1", "bar1")
            .with_command(["abcd"])
            .with_args(["efgh"])
            .with_env("KEEP", "me");
        let wrapped = wrap_step(step).unwrap();
        assert_eq!(wrapped.name, "foo1");
        assert_eq!(wrapped.image, "bar1");
        assert_eq!(wrapped.command, vec![ENTRYPOINT_BIN]);
        assert!(wrapped.args.is_empty());
        assert_eq!(wrapped.env[0].name, "KEEP");
        assert_eq!(wrapped.env[1].name, ENTRYPOINT_OPTIONS_ENV);
        assert_eq!(
            wrapped.env[1].value,
            r#"{"args":["abcd","efgh"],"process_log":"/tools/process-log.txt","marker_file":"/tools/marker-file.txt"}"#
        );
        assert_eq!(wrapped.volume_mounts.last().unwrap().mount_path, "/tools");
    }

    #[test]
    fn test_copy_step() {
        let step = copy_step(&Config::default());
        assert_eq!(step.name, "place-tools");
        assert_eq!(step.command, vec!["/bin/cp"]);
        assert_eq!(step.args, vec!["/entrypoint", "/tools/entrypoint"]);
    }
}
