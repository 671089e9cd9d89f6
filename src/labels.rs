//! Class label tables.

use anyhow::Context;

/// Ordered list of gesture names, indexed by class id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassLabelTable {
    labels: Vec<String>,
}

impl ClassLabelTable {
    pub fn new<I: IntoIterator<Item = S>, S: Into<String>>(labels: I) -> Self {
        Self {
            labels: labels.into_iter().map(Into::into).collect(),
        }
    }

    /// Parses a label table from a JSON array of strings.
    ///
    /// Returns `Ok(None)` if the array is empty, since an empty table is no better than no table.
    pub fn from_json(json: &[u8]) -> anyhow::Result<Option<Self>> {
        let labels: Vec<String> =
            serde_json::from_slice(json).context("label table must be a JSON array of strings")?;
        if labels.is_empty() {
            return Ok(None);
        }
        Ok(Some(Self { labels }))
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Returns the label of class `index`, if it is in range and not empty.
    pub fn get(&self, index: i64) -> Option<&str> {
        let index = usize::try_from(index).ok()?;
        self.labels
            .get(index)
            .map(String::as_str)
            .filter(|label| !label.is_empty())
    }
}

/// Resolves a class index to a display label.
///
/// Falls back to `Gesture {index}` if there is no table or the index is out of range.
pub fn resolve(table: Option<&ClassLabelTable>, index: i64) -> String {
    match table.and_then(|table| table.get(index)) {
        Some(label) => label.to_string(),
        None => format!("Gesture {index}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse() {
        let table = ClassLabelTable::from_json(br#"["Anjali", "Ardhachandra", "Pataka"]"#)
            .unwrap()
            .unwrap();
        assert_eq!(table.len(), 3);
        assert_eq!(table.get(1), Some("Ardhachandra"));
        assert_eq!(table.get(3), None);
        assert_eq!(table.get(-1), None);
    }

    #[test]
    fn empty_or_invalid() {
        assert_eq!(ClassLabelTable::from_json(b"[]").unwrap(), None);
        assert!(ClassLabelTable::from_json(br#"{"0": "Pataka"}"#).is_err());
        assert!(ClassLabelTable::from_json(b"[1, 2]").is_err());
    }

    #[test]
    fn fallback() {
        let table = ClassLabelTable::new(["Anjali", "Ardhachandra", "Pataka"]);
        assert_eq!(resolve(Some(&table), 2), "Pataka");
        assert_eq!(resolve(Some(&table), 5), "Gesture 5");
        assert_eq!(resolve(None, 0), "Gesture 0");
        assert_eq!(resolve(None, -1), "Gesture -1");

        let table = ClassLabelTable::new(["Anjali", ""]);
        assert_eq!(resolve(Some(&table), 1), "Gesture 1");
    }
}
