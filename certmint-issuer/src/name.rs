//! Distinguished name parsing.
//!
//! Accepts the comma-separated `ATTR=value` form operators type on the
//! command line, e.g. `CN=Example CA, O=Example Corp, C=US`.

use rcgen::{DistinguishedName, DnType};

use crate::error::IssuerError;

/// Parse an `ATTR=value,...` string into an rcgen [`DistinguishedName`].
///
/// Recognised attributes (case-insensitive): `CN`, `O`, `OU`, `C`, `ST`, `L`.
/// A literal comma inside a value is written as `\,` and a literal backslash
/// as `\\`. Whitespace around attribute names and values is ignored.
///
/// # Errors
///
/// Returns `IssuerError::InvalidName` for an empty name, a component without
/// `=`, an unknown attribute, an empty value, or a repeated attribute.
pub fn parse_distinguished_name(input: &str) -> Result<DistinguishedName, IssuerError> {
    let components = split_components(input)?;
    if components.iter().all(|c| c.trim().is_empty()) {
        return Err(IssuerError::InvalidName("name is empty".to_string()));
    }

    let mut dn = DistinguishedName::new();
    let mut seen: Vec<DnType> = Vec::new();

    for component in components {
        let (attr, value) = component.split_once('=').ok_or_else(|| {
            IssuerError::InvalidName(format!("component {:?} has no '='", component.trim()))
        })?;

        let dn_type = attribute_type(attr.trim())?;
        let value = value.trim();
        if value.is_empty() {
            return Err(IssuerError::InvalidName(format!(
                "attribute {} has an empty value",
                attr.trim()
            )));
        }
        if seen.contains(&dn_type) {
            return Err(IssuerError::InvalidName(format!(
                "attribute {} given more than once",
                attr.trim()
            )));
        }

        seen.push(dn_type.clone());
        dn.push(dn_type, value);
    }

    Ok(dn)
}

fn attribute_type(attr: &str) -> Result<DnType, IssuerError> {
    match attr.to_ascii_uppercase().as_str() {
        "CN" => Ok(DnType::CommonName),
        "O" => Ok(DnType::OrganizationName),
        "OU" => Ok(DnType::OrganizationalUnitName),
        "C" => Ok(DnType::CountryName),
        "ST" => Ok(DnType::StateOrProvinceName),
        "L" => Ok(DnType::LocalityName),
        other => Err(IssuerError::InvalidName(format!(
            "unknown attribute {:?}",
            other
        ))),
    }
}

/// Split on unescaped commas, resolving `\,` and `\\`.
fn split_components(input: &str) -> Result<Vec<String>, IssuerError> {
    let mut components = Vec::new();
    let mut current = String::new();
    let mut chars = input.chars();

    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some(escaped @ (',' | '\\')) => current.push(escaped),
                Some(other) => {
                    return Err(IssuerError::InvalidName(format!(
                        "unsupported escape sequence \\{}",
                        other
                    )))
                }
                None => {
                    return Err(IssuerError::InvalidName(
                        "trailing backslash".to_string(),
                    ))
                }
            },
            ',' => components.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    components.push(current);

    Ok(components)
}
