//! Wrapper around `transformix`, the point-warping tool shipped with elastix.

use crate::transforms::Points;
use crate::utils::error::{AddonsError, Result};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use tokio::process::Command;

const INPUT_FILE: &str = "transformix_input.txt";
const OUTPUT_FILE: &str = "outputpoints.txt";

#[derive(Debug, Clone)]
pub struct Transformix {
    binary: PathBuf,
}

impl Transformix {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    /// Warp `points` with the given TransformParameters file. Points must
    /// already be in the units the parameter file expects.
    pub async fn run(&self, points: &Points, parameter_file: &Path) -> Result<Points> {
        if points.is_empty() {
            return Ok(Points::default());
        }

        let parameter_file = tokio::fs::canonicalize(parameter_file).await.map_err(|e| {
            AddonsError::TransformixError {
                message: format!(
                    "transform parameter file {} is not readable: {}",
                    parameter_file.display(),
                    e
                ),
            }
        })?;

        // Each run gets its own directory so concurrent runs never collide on
        // transformix's fixed output file names.
        let workdir = tempfile::tempdir()?;
        let input = workdir.path().join(INPUT_FILE);
        tokio::fs::write(&input, input_file_contents(points)).await?;

        let mut command = Command::new(&self.binary);
        command
            .arg("-out")
            .arg(workdir.path())
            .arg("-tp")
            .arg(&parameter_file)
            .arg("-def")
            .arg(&input);
        // Parameter files may reference sibling files by relative path.
        if let Some(dir) = parameter_file.parent() {
            command.current_dir(dir);
        }

        tracing::debug!(
            "Running {} on {} points with {}",
            self.binary.display(),
            points.len(),
            parameter_file.display()
        );
        let output = command.output().await.map_err(|e| AddonsError::TransformixError {
            message: format!("could not start {}: {}", self.binary.display(), e),
        })?;

        let output_path = workdir.path().join(OUTPUT_FILE);
        if !tokio::fs::try_exists(&output_path).await? {
            return Err(AddonsError::TransformixError {
                message: format!(
                    "no {} was written (exit status {}). Tool output:\n{}",
                    OUTPUT_FILE,
                    output.status,
                    String::from_utf8_lossy(&output.stdout)
                ),
            });
        }

        let warped = parse_output_points(&tokio::fs::read_to_string(&output_path).await?)?;
        if warped.len() != points.len() {
            return Err(AddonsError::TransformixError {
                message: format!(
                    "sent {} points but got {} back",
                    points.len(),
                    warped.len()
                ),
            });
        }
        Ok(warped)
    }
}

impl Default for Transformix {
    fn default() -> Self {
        Self::new("transformix")
    }
}

/// `point`, the count, then one `x y z` line per point.
pub fn input_file_contents(points: &Points) -> String {
    let mut out = format!("point\n{}\n", points.len());
    for [x, y, z] in points.iter() {
        let _ = writeln!(out, "{:.6} {:.6} {:.6}", x, y, z);
    }
    out
}

/// Pull the `OutputPoint = [ x y z ]` field out of each line of outputpoints.txt.
pub fn parse_output_points(text: &str) -> Result<Points> {
    let rows = text
        .lines()
        .filter(|l| !l.trim().is_empty())
        .enumerate()
        .map(|(i, line)| {
            let field = line
                .split("OutputPoint = [")
                .nth(1)
                .and_then(|rest| rest.split(']').next())
                .ok_or_else(|| AddonsError::TransformixError {
                    message: format!("line {} has no OutputPoint: {}", i, line),
                })?;
            field
                .split_whitespace()
                .map(|v| {
                    v.parse::<f64>().map_err(|e| AddonsError::TransformixError {
                        message: format!("line {} has a bad coordinate '{}': {}", i, v, e),
                    })
                })
                .collect::<Result<Vec<f64>>>()
        })
        .collect::<Result<Vec<_>>>()?;
    Points::from_rows(&rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_input_file_format() {
        let points = Points::new(vec![[1.0, 2.5, -3.0], [100.125, 0.0, 7.0]]);
        assert_eq!(
            input_file_contents(&points),
            "point\n2\n1.000000 2.500000 -3.000000\n100.125000 0.000000 7.000000\n"
        );
    }

    #[test]
    fn test_parse_output_points() {
        let text = "Point\t0\t; InputIndex = [ 1 2 3 ]\t; InputPoint = [ 1.000000 2.000000 3.000000 ]\t; OutputIndexFixed = [ 4 5 6 ]\t; OutputPoint = [ 1.500000 2.250000 -3.000000 ]\t; Deformation = [ 0.5 0.25 -6.0 ]\n\
                    Point\t1\t; InputIndex = [ 0 0 0 ]\t; InputPoint = [ 0 0 0 ]\t; OutputIndexFixed = [ 0 0 0 ]\t; OutputPoint = [ 10 20 30 ]\t; Deformation = [ 10 20 30 ]\n";
        let points = parse_output_points(text).unwrap();
        assert_eq!(points.rows(), &[[1.5, 2.25, -3.0], [10.0, 20.0, 30.0]]);
    }

    #[test]
    fn test_parse_output_rejects_garbage() {
        assert!(parse_output_points("nothing useful here\n").is_err());
        assert!(parse_output_points("OutputPoint = [ 1 2 ]\n").is_err());
    }

    #[tokio::test]
    async fn test_empty_points_skip_the_tool() {
        let tool = Transformix::new("/definitely/not/a/real/transformix");
        let out = tool
            .run(&Points::default(), Path::new("/nope.txt"))
            .await
            .unwrap();
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn test_missing_parameter_file() {
        let tool = Transformix::default();
        let points = Points::new(vec![[1.0, 2.0, 3.0]]);
        let err = tool
            .run(&points, Path::new("/definitely/missing/params.txt"))
            .await
            .unwrap_err();
        assert!(matches!(err, AddonsError::TransformixError { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_tool_without_output_file() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("silent_transformix");
        std::fs::write(&script, "#!/bin/sh\necho 'nothing to do'\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        let params = dir.path().join("params.txt");
        std::fs::write(&params, "(Transform \"BSplineTransform\")\n").unwrap();

        let err = Transformix::new(&script)
            .run(&Points::new(vec![[1.0, 2.0, 3.0]]), &params)
            .await
            .unwrap_err();
        let AddonsError::TransformixError { message } = err else {
            panic!("expected a transformix error");
        };
        assert!(message.contains(OUTPUT_FILE));
        assert!(message.contains("nothing to do"));
    }
}
