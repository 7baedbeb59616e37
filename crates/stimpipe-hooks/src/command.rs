//! Textual subcommand vocabulary of the hook API, e.g. `AppendShader`,
//! `InsertAt4Builtin`, `Query`, `DumpAll`.

use stimpipe_core::ImagingError;

use crate::chains::InsertPosition;
use crate::entry::EntryKindTag;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookCommand {
    Add {
        position: InsertPosition,
        kind: EntryKindTag,
    },
    Remove,
    Reset,
    Enable,
    Disable,
    Query,
    Edit,
    Dump,
    DumpAll,
    ListAll,
    /// Read or override the imaging mode of a proxy window.
    ImagingMode,
}

impl HookCommand {
    pub fn parse(s: &str) -> Result<Self, ImagingError> {
        let simple = match s {
            "Remove" => Some(HookCommand::Remove),
            "Reset" => Some(HookCommand::Reset),
            "Enable" => Some(HookCommand::Enable),
            "Disable" => Some(HookCommand::Disable),
            "Query" => Some(HookCommand::Query),
            "Edit" => Some(HookCommand::Edit),
            "Dump" => Some(HookCommand::Dump),
            "DumpAll" => Some(HookCommand::DumpAll),
            "ListAll" => Some(HookCommand::ListAll),
            "ImagingMode" => Some(HookCommand::ImagingMode),
            _ => None,
        };
        if let Some(cmd) = simple {
            return Ok(cmd);
        }

        let (position, rest) = if let Some(rest) = s.strip_prefix("Append") {
            (InsertPosition::Append, rest)
        } else if let Some(rest) = s.strip_prefix("Prepend") {
            (InsertPosition::Prepend, rest)
        } else if let Some(rest) = s.strip_prefix("InsertAt") {
            let digits = rest.chars().take_while(|c| c.is_ascii_digit()).count();
            let n = rest[..digits]
                .parse::<usize>()
                .map_err(|_| unknown(s))?;
            (InsertPosition::At(n), &rest[digits..])
        } else {
            return Err(unknown(s));
        };

        let kind = EntryKindTag::from_name(rest).ok_or_else(|| unknown(s))?;
        Ok(HookCommand::Add { position, kind })
    }
}

fn unknown(s: &str) -> ImagingError {
    ImagingError::other(format!("unknown hook subcommand '{s}'"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_commands() {
        assert_eq!(
            HookCommand::parse("AppendShader").unwrap(),
            HookCommand::Add {
                position: InsertPosition::Append,
                kind: EntryKindTag::Shader
            }
        );
        assert_eq!(
            HookCommand::parse("PrependRuntimeFunction").unwrap(),
            HookCommand::Add {
                position: InsertPosition::Prepend,
                kind: EntryKindTag::RuntimeFunction
            }
        );
        assert_eq!(
            HookCommand::parse("InsertAt12Builtin").unwrap(),
            HookCommand::Add {
                position: InsertPosition::At(12),
                kind: EntryKindTag::Builtin
            }
        );
    }

    #[test]
    fn plain_commands() {
        assert_eq!(HookCommand::parse("DumpAll").unwrap(), HookCommand::DumpAll);
        assert_eq!(HookCommand::parse("ImagingMode").unwrap(), HookCommand::ImagingMode);
    }

    #[test]
    fn rejects_garbage() {
        assert!(HookCommand::parse("InsertAtShader").is_err());
        assert!(HookCommand::parse("AppendWidget").is_err());
        assert!(HookCommand::parse("append shader").is_err());
    }
}
