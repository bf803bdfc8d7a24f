//! Command-line parsing for the `drivekey` binary.

use drivekey_core::models::CarRegistration;

pub const USAGE: &str = "\
Usage: drivekey <command>

Commands:
  status                                 Show the current session
  login <email>                          Log in (prompts for password)
  sign-up <email>                        Create an account (prompts for password)
  logout                                 End the session
  add-car <model> <year> <km> [brand]    Register a vehicle
  help                                   Show this message

Environment:
  DRIVEKEY_API_URL              Backend base URL
  DRIVEKEY_TIMEOUT_SECS         Request timeout in seconds
  DRIVEKEY_RESTORE_POLICY       tokens-only | trust-stored-tokens
  DRIVEKEY_STORAGE              keyring | file | memory
  DRIVEKEY_STORAGE_PASSPHRASE   Passphrase for file storage
  DRIVEKEY_LOG_DIR              Also write daily log files here
  RUST_LOG                      Log filter (default: warn)";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Status,
    Login { email: String },
    SignUp { email: String },
    Logout,
    AddCar(CarRegistration),
    Help,
}

impl Command {
    /// Parse arguments after the program name.
    pub fn parse(args: &[String]) -> Result<Self, String> {
        let Some((name, rest)) = args.split_first() else {
            return Ok(Command::Status);
        };

        match name.as_str() {
            "status" => Ok(Command::Status),
            "login" => Ok(Command::Login {
                email: single_arg(rest, "login <email>")?,
            }),
            "sign-up" | "signup" => Ok(Command::SignUp {
                email: single_arg(rest, "sign-up <email>")?,
            }),
            "logout" => Ok(Command::Logout),
            "add-car" => match rest {
                [model, year, km] | [model, year, km, _] => Ok(Command::AddCar(CarRegistration {
                    brand: rest.get(3).cloned().unwrap_or_default(),
                    model: model.clone(),
                    year: year.clone(),
                    kilometers: km.clone(),
                })),
                _ => Err("expected: add-car <model> <year> <km> [brand]".to_string()),
            },
            "help" | "--help" | "-h" => Ok(Command::Help),
            other => Err(format!("unknown command: {}", other)),
        }
    }
}

fn single_arg(rest: &[String], usage: &str) -> Result<String, String> {
    match rest {
        [value] => Ok(value.clone()),
        _ => Err(format!("expected: {}", usage)),
    }
}
