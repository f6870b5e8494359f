/// A parsed request line.
///
/// `START` arguments that are missing, malformed or zero are left as `None`
/// and replaced by the configured defaults when the command is executed.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Start {
        duration_sec: Option<u32>,
        temp_threshold: Option<f64>,
    },
    Stop,
    Status,
    Results,
    Reset,
    FireStatus,
    /// Verb not recognised, kept upper-cased for the error message
    Unknown(String),
}

impl Command {
    /// Parse `VERB[:arg1[:arg2]]`. The verb is case-insensitive.
    pub fn parse(line: &str) -> Self {
        let mut parts = line.trim().split(':');
        let verb = parts.next().unwrap_or_default().trim().to_ascii_uppercase();

        match verb.as_str() {
            "START" => Command::Start {
                duration_sec: parts
                    .next()
                    .and_then(|arg| arg.trim().parse::<u32>().ok())
                    .filter(|&seconds| seconds > 0),
                temp_threshold: parts
                    .next()
                    .and_then(|arg| arg.trim().parse::<f64>().ok())
                    .filter(|delta| delta.is_finite() && *delta > 0.0),
            },
            "STOP" => Command::Stop,
            "STATUS" => Command::Status,
            "RESULTS" => Command::Results,
            "RESET" => Command::Reset,
            "FIRESTATUS" => Command::FireStatus,
            _ => Command::Unknown(verb),
        }
    }

    pub fn verb(&self) -> &str {
        match self {
            Command::Start { .. } => "START",
            Command::Stop => "STOP",
            Command::Status => "STATUS",
            Command::Results => "RESULTS",
            Command::Reset => "RESET",
            Command::FireStatus => "FIRESTATUS",
            Command::Unknown(verb) => verb,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_verbs() {
        assert_eq!(Command::parse("STOP"), Command::Stop);
        assert_eq!(Command::parse("status\r"), Command::Status);
        assert_eq!(Command::parse(" Results "), Command::Results);
        assert_eq!(Command::parse("reset"), Command::Reset);
        assert_eq!(Command::parse("FireStatus"), Command::FireStatus);
    }

    #[test]
    fn test_parse_start_arguments() {
        assert_eq!(
            Command::parse("START"),
            Command::Start {
                duration_sec: None,
                temp_threshold: None
            }
        );
        assert_eq!(
            Command::parse("start:45"),
            Command::Start {
                duration_sec: Some(45),
                temp_threshold: None
            }
        );
        assert_eq!(
            Command::parse("START:120:80"),
            Command::Start {
                duration_sec: Some(120),
                temp_threshold: Some(80.0)
            }
        );
    }

    #[test]
    fn test_malformed_arguments_fall_back_individually() {
        assert_eq!(
            Command::parse("START:abc:75"),
            Command::Start {
                duration_sec: None,
                temp_threshold: Some(75.0)
            }
        );
        assert_eq!(
            Command::parse("START:30:hot"),
            Command::Start {
                duration_sec: Some(30),
                temp_threshold: None
            }
        );
        assert_eq!(
            Command::parse("START:0:-5"),
            Command::Start {
                duration_sec: None,
                temp_threshold: None
            }
        );
    }

    #[test]
    fn test_unknown_verb() {
        assert_eq!(Command::parse("launch"), Command::Unknown("LAUNCH".to_string()));
        assert_eq!(Command::parse(""), Command::Unknown(String::new()));
        assert_eq!(Command::parse("fly:1").verb(), "FLY");
    }
}
