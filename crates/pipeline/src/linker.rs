//! Library address substitution.

use std::collections::BTreeMap;

use alloy_core::primitives::Address;

use crate::{
    contract::CompiledContract,
    error::{Error, Result},
    placeholder::{LibraryPlaceholder, split_hex_prefix},
};

/// Replace every placeholder region of `bytecode` with its library address.
///
/// Addresses are written as lowercase hex, left-padded with zeros to the
/// placeholder length. Bytes outside the placeholder regions are copied as-is,
/// including an optional `0x` prefix.
pub fn link_bytecode(
    bytecode: &str,
    placeholders: &[LibraryPlaceholder],
    addresses: &BTreeMap<String, Address>,
) -> Result<String> {
    let (prefix, code) = split_hex_prefix(bytecode);
    let mut linked = code.to_string();

    for placeholder in placeholders {
        let range = placeholder.hex_range();
        if range.end > linked.len()
            || !linked.is_char_boundary(range.start)
            || !linked.is_char_boundary(range.end)
        {
            return Err(Error::MalformedPlaceholder {
                contract: placeholder.contract_name.clone(),
                offset: placeholder.byte_offset,
            });
        }

        let address = lookup(placeholder, addresses)?;
        let encoded = format!(
            "{:0>width$}",
            hex::encode(address.as_slice()),
            width = range.len()
        );

        linked.replace_range(range, &encoded);
    }

    Ok(format!("{prefix}{linked}"))
}

fn lookup<'a>(
    placeholder: &LibraryPlaceholder,
    addresses: &'a BTreeMap<String, Address>,
) -> Result<&'a Address> {
    let mut matches = addresses
        .iter()
        .filter(|(name, _)| placeholder.refers_to(name));

    match (matches.next(), matches.next()) {
        (Some((_, address)), None) => Ok(address),
        _ => Err(Error::UnresolvedLibrary {
            contract: placeholder.contract_name.clone(),
            library: placeholder.referenced_library_name.clone(),
        }),
    }
}

/// Link `contract`, returning a new contract with substituted bytecode.
pub fn link_contract(
    contract: &CompiledContract,
    placeholders: &[LibraryPlaceholder],
    addresses: &BTreeMap<String, Address>,
) -> Result<CompiledContract> {
    let bytecode = link_bytecode(&contract.bytecode, placeholders, addresses)?;

    if !placeholders.is_empty() {
        tracing::debug!(
            contract = %contract.name,
            substitutions = placeholders.len(),
            "Linked library addresses"
        );
    }

    Ok(CompiledContract {
        bytecode,
        ..contract.clone()
    })
}
