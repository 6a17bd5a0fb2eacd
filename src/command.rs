// src/command.rs

//! The closed set of user commands

use std::fmt;
use std::str::FromStr;

/// A user command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Search,
    List,
    Info,
    Install,
    Remove,
    Update,
}

impl Command {
    /// Commands that only ever act on installed packages
    pub fn is_removal(&self) -> bool {
        matches!(self, Command::Remove)
    }

    /// Commands that hand jobs to the resolution engine
    pub fn needs_solver(&self) -> bool {
        matches!(self, Command::Install | Command::Remove | Command::Update)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Search => "search",
            Command::List => "list",
            Command::Info => "info",
            Command::Install => "install",
            Command::Remove => "remove",
            Command::Update => "update",
        }
    }
}

impl FromStr for Command {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "search" | "se" => Ok(Command::Search),
            "list" | "li" => Ok(Command::List),
            "info" => Ok(Command::Info),
            "install" | "in" => Ok(Command::Install),
            "remove" | "rm" | "erase" => Ok(Command::Remove),
            "update" | "up" => Ok(Command::Update),
            _ => Err(format!("Unknown command: {}", s)),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aliases() {
        assert_eq!("rm".parse::<Command>().unwrap(), Command::Remove);
        assert_eq!("erase".parse::<Command>().unwrap(), Command::Remove);
        assert_eq!("up".parse::<Command>().unwrap(), Command::Update);
        assert!("frobnicate".parse::<Command>().is_err());
    }

    #[test]
    fn test_removal_only_for_remove() {
        assert!(Command::Remove.is_removal());
        assert!(!Command::Install.is_removal());
        assert!(!Command::Search.needs_solver());
    }
}
