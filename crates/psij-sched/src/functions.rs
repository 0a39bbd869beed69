//! Helper functions available to submit-script generators.

use std::time::Duration;

use crate::error::{SchedError, SchedResult};

/// Read-only helpers for script generation.
#[derive(Debug, Default, Clone, Copy)]
pub struct FunctionLibrary;

impl FunctionLibrary {
    /// Whole minutes in `duration`.
    pub fn duration_to_minutes(&self, duration: Duration) -> u64 {
        duration.as_secs() / 60
    }

    /// Minutes in a walltime string of the form `HH:MM:SS`, `HH:MM` or `MM`.
    /// Seconds are truncated.
    pub fn walltime_to_minutes(&self, walltime: &str) -> SchedResult<u64> {
        let parts: Vec<&str> = walltime.trim().split(':').collect();
        let num = |s: &str| {
            s.trim().parse::<u64>().map_err(|e| {
                SchedError::Parse(format!("Error parsing walltime ({walltime}): {e}"))
            })
        };
        match parts.as_slice() {
            [m] => num(m),
            [h, m] | [h, m, _] => Ok(num(h)? * 60 + num(m)?),
            _ => Err(SchedError::Parse(format!(
                "Invalid walltime format ({walltime}). Expected HH:MM:SS or HH:MM or MM."
            ))),
        }
    }

    /// Format `duration` as `HH:MM:SS`. Hours are not wrapped at 24.
    pub fn format_duration(&self, duration: Duration) -> String {
        let secs = duration.as_secs();
        format!("{:02}:{:02}:{:02}", secs / 3600, (secs / 60) % 60, secs % 60)
    }

    /// Quote `s` for safe use as a single bash word.
    pub fn bash_escape(&self, s: &str) -> String {
        let safe = !s.is_empty()
            && s.chars()
                .all(|c| c.is_ascii_alphanumeric() || "@%+=:,./-_".contains(c));
        if safe {
            s.to_string()
        } else {
            format!("'{}'", s.replace('\'', "'\"'\"'"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_walltime_to_minutes() {
        let lib = FunctionLibrary;
        assert_eq!(lib.walltime_to_minutes("01:30:59").unwrap(), 90);
        assert_eq!(lib.walltime_to_minutes("2:05").unwrap(), 125);
        assert_eq!(lib.walltime_to_minutes("45").unwrap(), 45);
        assert!(lib.walltime_to_minutes("1:2:3:4").is_err());
        assert!(lib.walltime_to_minutes("ab:00").is_err());
    }

    #[test]
    fn test_format_duration() {
        let lib = FunctionLibrary;
        assert_eq!(lib.format_duration(Duration::from_secs(600)), "00:10:00");
        assert_eq!(lib.format_duration(Duration::from_secs(26 * 3600 + 61)), "26:01:01");
        assert_eq!(lib.duration_to_minutes(Duration::from_secs(3599)), 59);
    }

    #[test]
    fn test_bash_escape() {
        let lib = FunctionLibrary;
        assert_eq!(lib.bash_escape("/bin/echo"), "/bin/echo");
        assert_eq!(lib.bash_escape("hello world"), "'hello world'");
        assert_eq!(lib.bash_escape("it's"), "'it'\"'\"'s'");
        assert_eq!(lib.bash_escape(""), "''");
        assert_eq!(lib.bash_escape("$HOME"), "'$HOME'");
    }
}
