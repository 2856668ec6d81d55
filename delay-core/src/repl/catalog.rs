//! Command catalog shared by the parser and the `help` command.

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommandTag {
    List,
    Insert,
    Remove,
    Save,
    Load,
    Status,
    Help,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CommandSpec {
    pub name: &'static str,
    pub tag: CommandTag,
    pub usage: &'static str,
    pub summary: &'static str,
}

const COMMANDS: [CommandSpec; 7] = [
    CommandSpec {
        name: "list",
        tag: CommandTag::List,
        usage: "list",
        summary: "show the delay table",
    },
    CommandSpec {
        name: "insert",
        tag: CommandTag::Insert,
        usage: "insert <micros> [<pattern>]",
        summary: "add an entry; pattern is 0-31 or 0b bits (rightmost = ch1), default toggles all",
    },
    CommandSpec {
        name: "remove",
        tag: CommandTag::Remove,
        usage: "remove [<label>]",
        summary: "delete the labelled entry, or every entry",
    },
    CommandSpec {
        name: "save",
        tag: CommandTag::Save,
        usage: "save",
        summary: "write the table to non-volatile storage",
    },
    CommandSpec {
        name: "load",
        tag: CommandTag::Load,
        usage: "load",
        summary: "restore the table from non-volatile storage",
    },
    CommandSpec {
        name: "status",
        tag: CommandTag::Status,
        usage: "status",
        summary: "show trigger state and cycle count",
    },
    CommandSpec {
        name: "help",
        tag: CommandTag::Help,
        usage: "help [<command>]",
        summary: "list commands or describe one",
    },
];

/// Returns the full command catalog.
#[must_use]
pub const fn commands() -> &'static [CommandSpec] {
    &COMMANDS
}

/// Finds a command by name (case insensitive).
#[must_use]
pub fn find(name: &str) -> Option<&'static CommandSpec> {
    COMMANDS
        .iter()
        .find(|command| command.name.eq_ignore_ascii_case(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_ignores_case() {
        assert_eq!(find("InSeRt").map(|spec| spec.tag), Some(CommandTag::Insert));
        assert!(find("reboot").is_none());
    }

    #[test]
    fn every_tag_is_listed_once() {
        let tags = [
            CommandTag::List,
            CommandTag::Insert,
            CommandTag::Remove,
            CommandTag::Save,
            CommandTag::Load,
            CommandTag::Status,
            CommandTag::Help,
        ];
        for tag in tags {
            assert_eq!(commands().iter().filter(|spec| spec.tag == tag).count(), 1);
        }
    }
}
