use std::str::FromStr;

/// Written back by the board right after it recognizes a command.
pub const ACK: u8 = b'*';
/// Written back by the board when an upload produced no usable file.
pub const NACK: u8 = b'?';

/// Command names in match priority order. Index 0 is reserved and never
/// matched.
pub const VOCABULARY: [&str; 4] = ["NO_CMD", "TEST", "FW_UPLOADER", "GET_UPLOADER_STATUS"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Test,
    FwUploader,
    GetUploaderStatus,
    Unrecognized,
}

impl Command {
    /// Commands a client may put on the wire, in match priority order.
    pub const ALL: [Command; 3] = [Command::Test, Command::FwUploader, Command::GetUploaderStatus];

    pub fn name(self) -> &'static str {
        match self {
            Command::Test => VOCABULARY[1],
            Command::FwUploader => VOCABULARY[2],
            Command::GetUploaderStatus => VOCABULARY[3],
            Command::Unrecognized => VOCABULARY[0],
        }
    }

    /// The command as a client sends it: name plus LF.
    pub fn line(self) -> String {
        format!("{}\n", self.name())
    }
}

/// How an accumulated command line is matched against the vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MatchMode {
    /// A name anywhere in the line wins; what deployed clients rely on.
    #[default]
    Containment,
    /// The trimmed line must be exactly one name.
    Strict,
}

impl FromStr for MatchMode {
    type Err = ();
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "containment" | "compat" => Ok(MatchMode::Containment),
            "strict" => Ok(MatchMode::Strict),
            _ => Err(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_follow_vocabulary_order() {
        let names: Vec<_> = Command::ALL.iter().map(|c| c.name()).collect();
        assert_eq!(names, &VOCABULARY[1..]);
        assert_eq!(Command::FwUploader.line(), "FW_UPLOADER\n");
    }

    #[test]
    fn match_mode_from_str() {
        assert_eq!("STRICT".parse::<MatchMode>(), Ok(MatchMode::Strict));
        assert_eq!("compat".parse::<MatchMode>(), Ok(MatchMode::Containment));
        assert!("exact-ish".parse::<MatchMode>().is_err());
    }
}
