//! License allow-list applied to scraped entries.

/// Accepts entries whose license is in the configured allow-list.
///
/// An empty list accepts everything. Comparison trims both sides and ignores
/// ASCII case, so `" cc by 4.0"` matches `"CC BY 4.0"`.
#[derive(Debug, Clone, Default)]
pub struct LicenseFilter {
    allowed: Vec<String>,
}

impl LicenseFilter {
    pub fn new<I, S>(allowed: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let allowed = allowed
            .into_iter()
            .map(|s| s.as_ref().trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        Self { allowed }
    }

    pub fn accepts(&self, license: &str) -> bool {
        if self.allowed.is_empty() {
            return true;
        }
        let license = license.trim();
        self.allowed.iter().any(|a| a.eq_ignore_ascii_case(license))
    }

    pub fn is_open(&self) -> bool {
        self.allowed.is_empty()
    }
}
