use indexmap::IndexMap;
use serde_json::Value as Json;

use crate::codec::{self, TypeDesc, Value};
use crate::connector::Ui;
use crate::error::{CodecError, Result, UidlError};
use crate::rpc::{MethodInvocation, LEGACY_VARIABLE_INTERFACE, LEGACY_VARIABLE_METHOD};

/// separates the bursts of one request payload
pub const VAR_BURST_SEPARATOR: char = '\u{1d}';
/// escapes separator and escape characters inside a burst
pub const VAR_ESCAPE_CHARACTER: char = '\u{1b}';

/// Splits a request payload into bursts. Trailing empty bursts are dropped.
pub fn split_bursts(payload: &str) -> Vec<&str> {
    let mut bursts: Vec<&str> = payload.split(VAR_BURST_SEPARATOR).collect();
    while bursts.len() > 1 && bursts.last().map_or(false, |b| b.is_empty()) {
        bursts.pop();
    }
    bursts
}

/// Reverses the escaping of separator and escape characters in a burst.
///
/// # Errors
/// returns [`UidlError::Communication`] for an escape character at the very end and
/// [`UidlError::VersionMismatch`] for an escape sequence that is not understood
pub fn unescape_burst(burst: &str) -> Result<String> {
    let mut result = String::with_capacity(burst.len());
    let mut chars = burst.chars();
    while let Some(c) = chars.next() {
        if c != VAR_ESCAPE_CHARACTER {
            result.push(c);
            continue;
        }
        let escaped = chars.next().ok_or_else(|| {
            UidlError::Communication("unexpected end of message".to_string())
        })?;
        let unescaped = u32::from(escaped)
            .checked_sub(0x30)
            .and_then(char::from_u32)
            .ok_or(UidlError::VersionMismatch)?;
        if unescaped != VAR_ESCAPE_CHARACTER && unescaped != VAR_BURST_SEPARATOR {
            return Err(UidlError::VersionMismatch);
        }
        result.push(unescaped);
    }
    Ok(result)
}

fn malformed(expected: &str, found: &Json) -> UidlError {
    UidlError::Codec(CodecError::malformed(expected, found))
}

/// Parses an unescaped burst into invocations. Consecutive legacy variable changes for
/// the same connector are coalesced into one invocation.
///
/// # Errors
/// returns an error when the burst is not well formed
pub fn parse_invocations(ui: &Ui, burst: &str) -> Result<Vec<MethodInvocation>> {
    let json: Json = serde_json::from_str(burst)?;
    let invocations_json = json
        .as_array()
        .ok_or_else(|| malformed("array of invocations", &json))?;

    let mut invocations: Vec<MethodInvocation> = Vec::with_capacity(invocations_json.len());
    for invocation_json in invocations_json {
        let parts = invocation_json
            .as_array()
            .filter(|parts| parts.len() == 4)
            .ok_or_else(|| {
                malformed("[connectorId, interface, method, parameters]", invocation_json)
            })?;
        let connector_id = parts[0]
            .as_str()
            .ok_or_else(|| malformed("connector id", &parts[0]))?;
        let interface = parts[1]
            .as_str()
            .ok_or_else(|| malformed("interface name", &parts[1]))?;
        let method = parts[2]
            .as_str()
            .ok_or_else(|| malformed("method name", &parts[2]))?;
        let parameters = parts[3]
            .as_array()
            .ok_or_else(|| malformed("parameter array", &parts[3]))?;

        if interface == LEGACY_VARIABLE_INTERFACE && method == LEGACY_VARIABLE_METHOD {
            let (name, value) = parse_variable_change(ui, parameters)?;
            if let Some(MethodInvocation::LegacyVariables {
                connector_id: previous_id,
                variables,
            }) = invocations.last_mut()
            {
                if previous_id.as_str() == connector_id {
                    variables.insert(name, value);
                    continue;
                }
            }
            let mut variables = IndexMap::new();
            variables.insert(name, value);
            invocations.push(MethodInvocation::LegacyVariables {
                connector_id: connector_id.to_string(),
                variables,
            });
        } else {
            invocations.push(MethodInvocation::ServerRpc {
                connector_id: connector_id.to_string(),
                interface: interface.to_string(),
                method: method.to_string(),
                parameters: parameters.clone(),
            });
        }
    }
    Ok(invocations)
}

fn parse_variable_change(ui: &Ui, parameters: &[Json]) -> Result<(String, Value)> {
    if parameters.len() != 2 {
        return Err(UidlError::Communication(format!(
            "invalid parameters in legacy change variables call, expected 2, was {}",
            parameters.len()
        )));
    }
    let name = parameters[0]
        .as_str()
        .ok_or_else(|| malformed("variable name", &parameters[0]))?;
    let value = codec::decode_internal(&TypeDesc::UidlValue, true, &parameters[1], ui)?;
    Ok((name.to_string(), value))
}
