// src/recipe/kitchen/taste.rs

//! Taste: run a recipe's smoke test against an installed keg

use crate::error::{Error, Result};
use crate::recipe::format::{Recipe, TestSection};
use crate::recipe::parser::is_workspace_relative;
use std::fmt;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;
use tracing::{debug, info};

use super::keg::keg_vars;
use super::process::run_shell;

/// Expected and observed results of a failed smoke test
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestFailure {
    pub command: String,
    pub expected_exit_code: i32,
    /// `None` if the command was killed or timed out
    pub actual_exit_code: Option<i32>,
    pub expected_output: String,
    pub actual_output: String,
    pub stderr: String,
    pub timed_out: bool,
}

impl fmt::Display for TestFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Test failed: {}", self.command)?;
        match self.actual_exit_code {
            Some(code) => writeln!(
                f,
                "  exit code: expected {}, got {}",
                self.expected_exit_code, code
            )?,
            None if self.timed_out => writeln!(
                f,
                "  exit code: expected {}, command timed out",
                self.expected_exit_code
            )?,
            None => writeln!(
                f,
                "  exit code: expected {}, killed by signal",
                self.expected_exit_code
            )?,
        }
        writeln!(f, "  expected output:\n{}", indent(&self.expected_output))?;
        write!(f, "  actual output:\n{}", indent(&self.actual_output))?;
        if !self.stderr.trim().is_empty() {
            write!(f, "\n  stderr:\n{}", indent(self.stderr.trim_end()))?;
        }
        Ok(())
    }
}

fn indent(text: &str) -> String {
    text.lines()
        .map(|l| format!("    {}", l))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Run `test` against the keg at `keg`
///
/// Fixtures are written into a temporary workspace that is removed on every
/// exit path. The keg's `bin` directory is first on `PATH`.
pub fn taste(recipe: &Recipe, test: &TestSection, keg: &Path, timeout: Duration) -> Result<()> {
    let workspace = TempDir::new()
        .map_err(|e| Error::IoError(format!("Failed to create test workspace: {}", e)))?;

    for (relative, content) in &test.fixtures {
        if !is_workspace_relative(Path::new(relative)) {
            return Err(Error::ParseError(format!(
                "Test fixture path escapes the workspace: {}",
                relative
            )));
        }
        let path = workspace.path().join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, content)?;
        debug!("Wrote fixture {}", relative);
    }

    let mut vars = keg_vars(keg);
    vars.insert(
        "testpath".to_string(),
        workspace.path().to_string_lossy().into_owned(),
    );
    let command = recipe.substitute(&test.command, &vars)?;

    let mut path = vec![keg.join("bin")];
    if let Some(existing) = std::env::var_os("PATH") {
        path.extend(std::env::split_paths(&existing));
    }
    let path = std::env::join_paths(path)
        .map_err(|e| Error::IoError(format!("Invalid PATH: {}", e)))?;
    let env = vec![("PATH".to_string(), path.to_string_lossy().into_owned())];

    info!("Testing {}: {}", recipe.package.name, command);
    let output = run_shell(&command, workspace.path(), &env, timeout)?;

    let actual = output.stdout.trim_end();
    let expected = test.expected_output.trim_end();
    if output.exit_code == Some(test.expected_exit_code) && actual == expected {
        info!("Test passed for {}", recipe.package.name);
        return Ok(());
    }

    Err(TestFailure {
        command,
        expected_exit_code: test.expected_exit_code,
        actual_exit_code: output.exit_code,
        expected_output: expected.to_string(),
        actual_output: actual.to_string(),
        stderr: output.stderr,
        timed_out: output.timed_out,
    }
    .into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recipe::parser::parse_recipe;

    fn recipe(test: &str) -> Recipe {
        parse_recipe(&format!(
            r#"
[package]
name = "quantor"
version = "3.2"

[source]
url = "http://fmv.jku.at/quantor/quantor-3.2.tar.gz"
checksum = "sha256:7a82ebfd1c8ecc250325f311e725f6263bf69b412edcc2b600db2a25937d1189"

{test}
"#
        ))
        .unwrap()
    }

    /// A keg whose `quantor` prints a fixed answer and exits 10
    fn fake_keg(answer: &str) -> TempDir {
        let keg = TempDir::new().unwrap();
        let bin = keg.path().join("bin");
        fs::create_dir_all(&bin).unwrap();
        let script = bin.join("quantor");
        fs::write(
            &script,
            format!("#!/bin/sh\ntest -f \"$1\" || exit 2\nprintf '{}\\n'\nexit 10\n", answer),
        )
        .unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
        }
        keg
    }

    const TEST: &str = r#"
[test]
command = "quantor %(testpath)s/test.dimacs"
expected_exit_code = 10
expected_output = "s TRUE\n"

[test.fixtures]
"test.dimacs" = "p cnf 2 1\ne 2 0\na 1 0\n2 1 0\n"
"#;

    #[test]
    fn test_pass_with_trailing_whitespace_trimmed() {
        let recipe = recipe(TEST);
        let keg = fake_keg("s TRUE   ");
        taste(&recipe, recipe.test.as_ref().unwrap(), keg.path(), Duration::from_secs(10)).unwrap();
    }

    #[test]
    fn test_output_mismatch_reports_both() {
        let recipe = recipe(TEST);
        let keg = fake_keg("s FALSE");
        let err = taste(&recipe, recipe.test.as_ref().unwrap(), keg.path(), Duration::from_secs(10))
            .unwrap_err();

        let Error::TestFailed(failure) = err else {
            panic!("expected TestFailed, got {:?}", err);
        };
        assert_eq!(failure.expected_output, "s TRUE");
        assert_eq!(failure.actual_output, "s FALSE");
        assert_eq!(failure.actual_exit_code, Some(10));
        let message = failure.to_string();
        assert!(message.contains("s TRUE") && message.contains("s FALSE"));
    }

    #[test]
    fn test_exit_code_mismatch() {
        let recipe = recipe(&TEST.replace("expected_exit_code = 10", "expected_exit_code = 0"));
        let keg = fake_keg("s TRUE");
        let err = taste(&recipe, recipe.test.as_ref().unwrap(), keg.path(), Duration::from_secs(10))
            .unwrap_err();
        assert!(matches!(
            err,
            Error::TestFailed(ref f) if f.expected_exit_code == 0 && f.actual_exit_code == Some(10)
        ));
    }

    #[test]
    fn test_rejects_escaping_fixture() {
        let recipe = recipe(&TEST.replace("\"test.dimacs\" =", "\"../test.dimacs\" ="));
        let keg = fake_keg("s TRUE");
        assert!(matches!(
            taste(&recipe, recipe.test.as_ref().unwrap(), keg.path(), Duration::from_secs(10)),
            Err(Error::ParseError(_))
        ));
    }
}
