use domain::DirtyValues;
use std::env;
use std::str::FromStr;
use tracing::{info, warn};

pub const DEFAULT_PORT: u16 = 3000;

/// Process settings read from the environment at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppConfig {
    pub port: u16,
    /// Policy used when neither the request nor the collection sets one.
    pub dirty_values: DirtyValues,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            dirty_values: DirtyValues::default(),
        }
    }
}

impl AppConfig {
    /// Reads `PORT` and `DIRTY_VALUES`. Unset or invalid values fall back to defaults.
    pub fn from_env() -> Self {
        Self::from_vars(env::var("PORT").ok(), env::var("DIRTY_VALUES").ok())
    }

    fn from_vars(port: Option<String>, dirty_values: Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            port: parse_var("PORT", port, defaults.port),
            dirty_values: parse_var("DIRTY_VALUES", dirty_values, defaults.dirty_values),
        }
    }
}

fn parse_var<T>(name: &str, raw: Option<String>, default: T) -> T
where
    T: FromStr + std::fmt::Display,
{
    match raw {
        Some(raw) => match T::from_str(&raw) {
            Ok(value) => {
                info!("Using {} {} from environment variable.", name, value);
                value
            }
            Err(_) => {
                warn!(
                    "Invalid {} value '{}' in environment variable. Using default {}.",
                    name, raw, default
                );
                default
            }
        },
        None => {
            info!(
                "{} environment variable not set. Using default {}.",
                name, default
            );
            default
        }
    }
}
