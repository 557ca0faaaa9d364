mod parser;
mod types;
mod validator;

pub use parser::{parse_config, parse_config_str};
pub use types::*;
pub use validator::{is_usable, validate_config};
