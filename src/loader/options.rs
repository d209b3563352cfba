use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// How much of a load is memoized
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum CacheLevel {
    /// Nothing is stored
    None,
    /// The converted form is stored; every load executes again
    ConvertedOnly,
    /// The executed result is stored
    #[default]
    FullResult,
}

impl CacheLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheLevel::None => "none",
            CacheLevel::ConvertedOnly => "converted-only",
            CacheLevel::FullResult => "full-result",
        }
    }
}

impl fmt::Display for CacheLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CacheLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" => Ok(CacheLevel::None),
            "converted-only" | "converted_only" => Ok(CacheLevel::ConvertedOnly),
            "full-result" | "full_result" => Ok(CacheLevel::FullResult),
            other => Err(format!(
                "invalid cache level '{}', expected none, converted-only or full-result",
                other
            )),
        }
    }
}

/// Per-call load configuration, propagated unchanged to nested loads
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadOptions {
    pub cache_level: CacheLevel,
    /// Explicit TTL; `None` compares modification times
    pub max_age: Option<Duration>,
    /// Bindings injected into every execution of the chain
    pub context: Map<String, Value>,
}

impl LoadOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cache_level(mut self, cache_level: CacheLevel) -> Self {
        self.cache_level = cache_level;
        self
    }

    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = Some(max_age);
        self
    }

    /// Milliseconds as accepted on the public surface: a negative value means
    /// "use modification times"
    pub fn with_max_age_ms(mut self, max_age_ms: i64) -> Self {
        self.max_age = u64::try_from(max_age_ms).ok().map(Duration::from_millis);
        self
    }

    pub fn with_binding(mut self, name: impl Into<String>, value: Value) -> Self {
        self.context.insert(name.into(), value);
        self
    }

    pub fn with_context(mut self, context: Map<String, Value>) -> Self {
        self.context = context;
        self
    }

    pub(crate) fn stores_converted(&self) -> bool {
        self.cache_level != CacheLevel::None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_cache_level_parsing() {
        assert_eq!("none".parse::<CacheLevel>().unwrap(), CacheLevel::None);
        assert_eq!(
            "converted-only".parse::<CacheLevel>().unwrap(),
            CacheLevel::ConvertedOnly
        );
        assert_eq!(
            "FULL-RESULT".parse::<CacheLevel>().unwrap(),
            CacheLevel::FullResult
        );
        assert!("everything".parse::<CacheLevel>().is_err());
        assert_eq!(CacheLevel::default(), CacheLevel::FullResult);
    }

    #[test]
    fn test_negative_max_age_uses_modification_time() {
        assert_eq!(LoadOptions::new().with_max_age_ms(-1).max_age, None);
        assert_eq!(
            LoadOptions::new().with_max_age_ms(0).max_age,
            Some(Duration::ZERO)
        );
        assert_eq!(
            LoadOptions::new().with_max_age_ms(1500).max_age,
            Some(Duration::from_millis(1500))
        );
    }

    #[test]
    fn test_bindings() {
        let options = LoadOptions::new()
            .with_binding("greeting", json!("hi"))
            .with_binding("n", json!(2));
        assert_eq!(options.context.len(), 2);
        assert_eq!(options.context["greeting"], json!("hi"));
    }
}
