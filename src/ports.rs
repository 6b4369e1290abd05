use log::info;

use crate::ArmError;
use crate::prompt::{Prompt, PromptError};

/// Names of the serial endpoints currently present, in the order the OS
/// reports them.
pub fn discover() -> Result<Vec<String>, ArmError> {
    let ports = serialport::available_ports()?;
    let names: Vec<String> = ports.into_iter().map(|port| port.port_name).collect();
    info!("Discovered serial ports: {names:?}");
    Ok(names)
}

/// Rejects an empty discovery result.
pub fn require_any(names: Vec<String>) -> Result<Vec<String>, ArmError> {
    if names.is_empty() {
        Err(ArmError::NoPorts)
    } else {
        Ok(names)
    }
}

pub fn select(prompt: &mut dyn Prompt, names: &[String]) -> Result<String, PromptError> {
    let labels: Vec<&str> = names.iter().map(String::as_str).collect();
    let index = prompt.select("Select the Dobot port", &labels)?;
    Ok(names[index].clone())
}

/// Discovery, selection and connection as one flow. Nothing is opened when
/// discovery comes back empty.
pub fn connect<T, E>(
    discovered: Result<Vec<String>, ArmError>,
    choose: impl FnOnce(&[String]) -> Result<String, E>,
    open: impl FnOnce(&str) -> Result<T, E>,
) -> Result<T, E>
where
    E: From<ArmError>,
{
    let names = require_any(discovered?)?;
    let port = choose(&names)?;
    info!("Connecting on {port}");
    open(&port)
}
