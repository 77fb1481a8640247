pub mod auth;
pub mod certificate;
pub mod proxy_host;

use serde::{Deserialize, Deserializer};

/// Deserializes `null` into the type's default value.
///
/// NPM reports several fields as `null` on read that it refuses to accept back as `null`.
pub fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

pub(crate) fn default_true() -> bool {
    true
}

#[cfg(test)]
pub(crate) mod tests {
    use serde::de::DeserializeOwned;
    use std::fs::File;
    use std::io::BufReader;
    use std::path::Path;

    /// Reads a JSON fixture from the `test/` directory.
    pub fn read_json_from_file<T, P>(path: P) -> Result<T, Box<dyn std::error::Error>>
    where
        T: DeserializeOwned,
        P: AsRef<Path>,
    {
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        let value = serde_json::from_reader(reader)?;
        Ok(value)
    }

    /// Reads a JSON fixture as raw text, e.g. to serve it from a mock server.
    pub fn read_fixture<P: AsRef<Path>>(path: P) -> String {
        std::fs::read_to_string(path).expect("fixture must exist")
    }
}
