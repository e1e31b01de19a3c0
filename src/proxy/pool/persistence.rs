use crate::error::ProxyResult;
use crate::models::AccountRegistry;
use std::fs;
use std::path::Path;

pub(crate) fn read_registry(path: &Path) -> ProxyResult<AccountRegistry> {
    if !path.exists() {
        return Ok(AccountRegistry::default());
    }
    let content = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

/// Temp-file-plus-rename so a concurrent reader never observes partial JSON.
pub(crate) fn write_registry_atomic(path: &Path, registry: &AccountRegistry) -> ProxyResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.exists() {
            fs::create_dir_all(parent)?;
        }
    }
    let content = serde_json::to_string_pretty(registry)?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, content)?;
    fs::rename(&tmp, path)?;
    Ok(())
}
