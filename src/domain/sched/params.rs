use crate::error::{Error, Result};

pub const DEFAULT_QUEUE_DEPTH: usize = 1024;

/// Policy-agnostic scheduling parameters, parsed from the
/// `sched-params=queue-depth=N,delay-sched=BOOL` configuration string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedParams {
    /// Bound on how many pending jobs a single pass will touch.
    pub queue_depth: usize,
    /// Defer passes until the event intake is idle, coalescing bursts of
    /// transitions into one pass.
    pub delay_sched: bool,
}

impl Default for SchedParams {
    fn default() -> SchedParams {
        SchedParams { queue_depth: DEFAULT_QUEUE_DEPTH, delay_sched: false }
    }
}

impl SchedParams {
    /// Parses a comma-separated `key=value` list. Unknown keys fail.
    pub fn parse(args: &str) -> Result<SchedParams> {
        let mut params = SchedParams::default();
        for entry in args.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let Some((key, value)) = entry.split_once('=') else {
                return Err(Error::invalid(format!("malformed sched-params entry '{}'", entry)));
            };
            match key {
                "queue-depth" => {
                    params.queue_depth = value.parse().map_err(|_| Error::invalid(format!("queue-depth value '{}'", value)))?;
                    if params.queue_depth == 0 {
                        return Err(Error::invalid("queue-depth must be at least 1"));
                    }
                }
                "delay-sched" => {
                    params.delay_sched = value.parse().map_err(|_| Error::invalid(format!("delay-sched value '{}'", value)))?;
                }
                other => return Err(Error::invalid(format!("unknown sched-params key '{}'", other))),
            }
        }
        Ok(params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_both_keys() {
        let params = SchedParams::parse("queue-depth=16,delay-sched=true").unwrap();
        assert_eq!(params.queue_depth, 16);
        assert!(params.delay_sched);
    }

    #[test]
    fn empty_string_gives_defaults() {
        assert_eq!(SchedParams::parse("").unwrap(), SchedParams::default());
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(SchedParams::parse("queue-depht=16").is_err());
        assert!(SchedParams::parse("queue-depth=0").is_err());
    }
}
