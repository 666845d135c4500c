//! `oofs admin`: edit the permission file on this machine.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Subcommand;
use oofs_acl::AccessTable;
use oofs_config::Config;

#[derive(Subcommand, Debug)]
pub enum AdminCommands {
    /// Add a login
    AddUser {
        login: String,
        #[arg(env = "OOFS_NEW_PASSWORD")]
        password: String,
    },
    /// Remove a login and its rules
    DelUser { login: String },
    /// Rename a login, keeping its password and rules
    RenameUser { old: String, new: String },
    /// Set a login's password
    Passwd {
        login: String,
        #[arg(env = "OOFS_NEW_PASSWORD")]
        password: String,
    },
    /// Grant MODE (r, w, rw or -) under PREFIX; login "all" applies to everyone
    AddRule {
        login: String,
        mode: String,
        prefix: PathBuf,
    },
    ChangeRule {
        login: String,
        prefix: PathBuf,
        mode: String,
    },
    DelRule { login: String, prefix: PathBuf },
    /// Print subjects and their rules
    Show,
}

pub fn run(command: AdminCommands, config: &Config) -> Result<()> {
    let file = config.password_file();
    let create = matches!(command, AdminCommands::AddUser { .. } | AdminCommands::AddRule { .. });
    let mut table = AccessTable::load(&file, create)
        .with_context(|| format!("Cannot open permission file {}", file.display()))?;

    match command {
        AdminCommands::AddUser { login, password } => table.add_user(&login, &password)?,
        AdminCommands::DelUser { login } => table.delete_user(&login)?,
        AdminCommands::RenameUser { old, new } => table.change_login(&old, &new)?,
        AdminCommands::Passwd { login, password } => table.change_password(&login, &password)?,
        AdminCommands::AddRule {
            login,
            mode,
            prefix,
        } => table.add_rule(&login, &mode, &prefix)?,
        AdminCommands::ChangeRule {
            login,
            prefix,
            mode,
        } => table.change_rule(&login, &prefix, &mode)?,
        AdminCommands::DelRule { login, prefix } => table.delete_rule(&login, &prefix)?,
        AdminCommands::Show => print!("{}", describe(&table)),
    }
    Ok(())
}

/// Human-readable listing; password hashes are not shown.
pub fn describe(table: &AccessTable) -> String {
    let mut out = String::new();
    for subject in table.subjects() {
        out.push_str(&subject.login);
        out.push('\n');
        for rule in &subject.rules {
            out.push_str(&format!("  {:<2} {}\n", rule.mode.to_string(), rule.prefix.display()));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn config_in(temp: &TempDir) -> Config {
        let mut config = Config::default();
        config.paths.config_dir = temp.path().to_path_buf();
        config
    }

    #[test]
    fn test_admin_commands_edit_the_file() {
        let temp = TempDir::new().unwrap();
        let config = config_in(&temp);

        run(
            AdminCommands::AddUser {
                login: "bob".into(),
                password: "pw".into(),
            },
            &config,
        )
        .unwrap();
        run(
            AdminCommands::AddRule {
                login: "bob".into(),
                mode: "rw".into(),
                prefix: "/db/ext".into(),
            },
            &config,
        )
        .unwrap();

        let table = AccessTable::load(&config.password_file(), false).unwrap();
        assert!(table.authenticate("bob", "pw"));
        assert_eq!(describe(&table), "bob\n  rw /db/ext\n");
    }

    #[test]
    fn test_editing_missing_file_fails() {
        let temp = TempDir::new().unwrap();
        let config = config_in(&temp);
        let err = run(
            AdminCommands::DelUser {
                login: "bob".into(),
            },
            &config,
        );
        assert!(err.is_err());
        assert!(!config.password_file().exists());
    }
}
