//! Model and video-analysis collaborators
//!
//! Both are synchronous and may be CPU or GPU bound; stage tasks call them
//! on the blocking thread pool. The command-backed implementations use
//! `std::process::Command` for that reason and never touch the async runtime.

use crate::config::ModelsConfig;
use crate::error::{LeafError, LeafResult};
use std::path::Path;
use std::process::Command;
use tracing::debug;

/// Predicts the intact leaf area from manual measurements
pub trait AreaModel: Send + Sync {
    fn predict(&self, leaf_number: u32, leaf_widths: &[f64]) -> LeafResult<f64>;
}

/// Measures the remaining leaf area in a scan video
pub trait VideoScanner: Send + Sync {
    fn scan(&self, video_path: &Path, output_dir: &Path, length: f64) -> LeafResult<f64>;
}

/// [`AreaModel`] backed by an external program
///
/// Invoked as `<cmd...> <leaf_number> <w1,w2,...>`.
#[derive(Debug, Clone)]
pub struct CommandModel {
    command: Vec<String>,
}

impl CommandModel {
    pub fn new(command: Vec<String>) -> Self {
        Self { command }
    }
}

impl AreaModel for CommandModel {
    fn predict(&self, leaf_number: u32, leaf_widths: &[f64]) -> LeafResult<f64> {
        let widths = leaf_widths
            .iter()
            .map(f64::to_string)
            .collect::<Vec<_>>()
            .join(",");
        run_for_number(&self.command, &[leaf_number.to_string(), widths])
    }
}

/// [`VideoScanner`] backed by an external program
///
/// Invoked as `<cmd...> <video_path> <output_dir> <length>`.
#[derive(Debug, Clone)]
pub struct CommandScanner {
    command: Vec<String>,
}

impl CommandScanner {
    pub fn new(command: Vec<String>) -> Self {
        Self { command }
    }
}

impl VideoScanner for CommandScanner {
    fn scan(&self, video_path: &Path, output_dir: &Path, length: f64) -> LeafResult<f64> {
        std::fs::create_dir_all(output_dir)
            .map_err(|e| LeafError::io(format!("creating {}", output_dir.display()), e))?;
        run_for_number(
            &self.command,
            &[
                video_path.display().to_string(),
                output_dir.display().to_string(),
                length.to_string(),
            ],
        )
    }
}

/// Collaborators configured from `[models]`
pub fn from_config(models: &ModelsConfig) -> (CommandModel, CommandScanner) {
    (
        CommandModel::new(models.original_area_cmd.clone()),
        CommandScanner::new(models.simulated_area_cmd.clone()),
    )
}

/// Run `command` with `args` and parse the last stdout line as a number
fn run_for_number(command: &[String], args: &[String]) -> LeafResult<f64> {
    let (program, base_args) = command
        .split_first()
        .ok_or_else(|| LeafError::Internal("model command is empty".to_string()))?;

    debug!(program, ?args, "Running model command");
    let output = Command::new(program)
        .args(base_args)
        .args(args)
        .output()
        .map_err(|e| LeafError::io(format!("running {program}"), e))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(LeafError::Internal(format!(
            "{program} exited with {}: {}",
            output.status,
            stderr.trim()
        )));
    }

    parse_area(&String::from_utf8_lossy(&output.stdout))
}

fn parse_area(stdout: &str) -> LeafResult<f64> {
    let line = stdout
        .lines()
        .map(str::trim)
        .rfind(|l| !l.is_empty())
        .ok_or_else(|| LeafError::Internal("model printed nothing".to_string()))?;

    let value: f64 = line
        .parse()
        .map_err(|_| LeafError::Internal(format!("model printed non-numeric output: {line}")))?;
    if !value.is_finite() {
        return Err(LeafError::Internal(format!("model printed {value}")));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_last_non_empty_line() {
        assert_eq!(parse_area("loading weights\n42.5\n\n").unwrap(), 42.5);
        assert!(parse_area("").is_err());
        assert!(parse_area("area: 3").is_err());
        assert!(parse_area("NaN").is_err());
    }

    #[cfg(unix)]
    #[test]
    fn command_model_passes_arguments() {
        let model = CommandModel::new(vec![
            "sh".into(),
            "-c".into(),
            r#"echo "$1" >&2; echo 12.5"#.into(),
            "model".into(),
        ]);

        assert_eq!(model.predict(3, &[1.0, 2.5]).unwrap(), 12.5);
    }

    #[cfg(unix)]
    #[test]
    fn failing_command_is_an_error() {
        let model = CommandModel::new(vec!["sh".into(), "-c".into(), "exit 3".into()]);
        assert!(model.predict(3, &[1.0]).is_err());
    }

    #[test]
    fn empty_command_is_rejected() {
        let model = CommandModel::new(Vec::new());
        assert!(matches!(
            model.predict(1, &[1.0]),
            Err(LeafError::Internal(_))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn scanner_creates_output_dir() {
        let temp = tempfile::TempDir::new().unwrap();
        let out = temp.path().join("out/J1");
        let scanner = CommandScanner::new(vec!["sh".into(), "-c".into(), "echo 7".into()]);

        let area = scanner.scan(&temp.path().join("v.mp4"), &out, 10.0).unwrap();

        assert_eq!(area, 7.0);
        assert!(out.is_dir());
    }
}
