use crate::{
    AllocationKey, Error, Result,
    key::{normalize_code, normalize_special_code},
};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, path::Path};
use tracing::debug;

/// A short code paired with its human-readable name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub code: String,
    pub name: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
struct CatalogRow {
    short_category: String,
    actual_category: String,
    short_color: String,
    actual_color: String,
}

#[derive(Debug, Clone)]
struct CategoryEntry {
    name: String,
    colors: Vec<CatalogEntry>,
}

/// Which colors exist for which product category, and what they are called.
///
/// Listings keep the order in which codes first appear in the source file.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    order: Vec<String>,
    categories: BTreeMap<String, CategoryEntry>,
}

impl Catalog {
    /// Reads a catalog with the columns `SHORT_CATEGORY`, `ACTUAL_CATEGORY`,
    /// `SHORT_COLOR` and `ACTUAL_COLOR`.
    pub fn load(path: &Path) -> Result<Self> {
        let mut reader = csv::Reader::from_path(path).map_err(|e| Error::from_csv(path, e))?;
        let mut catalog = Self::default();
        for row in reader.deserialize::<CatalogRow>() {
            let row = row.map_err(|e| Error::from_csv(path, e))?;
            catalog
                .insert(
                    &row.short_category,
                    &row.actual_category,
                    &row.short_color,
                    &row.actual_color,
                )
                .map_err(|e| Error::corrupt(path, e.to_string()))?;
        }
        debug!(
            path = %path.display(),
            categories = catalog.order.len(),
            "catalog loaded"
        );
        Ok(catalog)
    }

    /// Adds one category/color pairing. A repeated pair keeps its first names.
    pub fn insert(
        &mut self,
        category: &str,
        category_name: &str,
        color: &str,
        color_name: &str,
    ) -> Result<()> {
        let category = normalize_code("category", category)?;
        let color = normalize_code("color", color)?;

        let entry = self.categories.entry(category.clone()).or_insert_with(|| {
            self.order.push(category);
            CategoryEntry {
                name: category_name.trim().to_owned(),
                colors: Vec::new(),
            }
        });
        if !entry.colors.iter().any(|c| c.code == color) {
            entry.colors.push(CatalogEntry {
                code: color,
                name: color_name.trim().to_owned(),
            });
        }
        Ok(())
    }

    pub fn categories(&self) -> Vec<CatalogEntry> {
        self.order
            .iter()
            .filter_map(|code| {
                self.categories.get(code).map(|c| CatalogEntry {
                    code: code.clone(),
                    name: c.name.clone(),
                })
            })
            .collect()
    }

    /// Colors mapped under `category`, or `None` for an unknown category.
    pub fn colors(&self, category: &str) -> Option<&[CatalogEntry]> {
        self.categories
            .get(&category.trim().to_ascii_uppercase())
            .map(|c| c.colors.as_slice())
    }

    pub fn category_name(&self, category: &str) -> Option<&str> {
        self.categories
            .get(&category.trim().to_ascii_uppercase())
            .map(|c| c.name.as_str())
    }

    pub fn color_name(&self, category: &str, color: &str) -> Option<&str> {
        let color = color.trim().to_ascii_uppercase();
        self.colors(category)?
            .iter()
            .find(|c| c.code == color)
            .map(|c| c.name.as_str())
    }

    /// Checks a request against the catalog and returns one key per color,
    /// in request order, plus the normalised special code.
    pub fn validate(
        &self,
        category: &str,
        colors: &[String],
        special_code: &str,
    ) -> Result<(Vec<AllocationKey>, String)> {
        let special_code = normalize_special_code(special_code)?;
        if colors.is_empty() {
            return Err(Error::invalid("at least one color is required"));
        }

        let mut keys: Vec<AllocationKey> = Vec::with_capacity(colors.len());
        for color in colors {
            let key = AllocationKey::new(category, color)?;
            if self.category_name(key.category()).is_none() {
                return Err(Error::invalid(format!(
                    "unknown category {}",
                    key.category()
                )));
            }
            if self.color_name(key.category(), key.color()).is_none() {
                return Err(Error::invalid(format!(
                    "color {} is not offered for category {}",
                    key.color(),
                    key.category()
                )));
            }
            if keys.contains(&key) {
                return Err(Error::invalid(format!("color {} listed twice", key.color())));
            }
            keys.push(key);
        }
        Ok((keys, special_code))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const SOURCE: &str = "\
SHORT_CATEGORY,ACTUAL_CATEGORY,SHORT_COLOR,ACTUAL_COLOR
AL,Alpha Lubricant,RED,Red
AL,Alpha Lubricant,BLK,Black
BE,Beta Engine Oil,RED,Red
AL,Alpha Lubricant,RED,Crimson
";

    fn catalog() -> Catalog {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("category_colors.csv");
        fs::write(&path, SOURCE).unwrap();
        Catalog::load(&path).unwrap()
    }

    #[test]
    fn lists_in_first_seen_order() {
        let catalog = catalog();
        let codes: Vec<_> = catalog.categories().into_iter().map(|c| c.code).collect();
        assert_eq!(codes, ["AL", "BE"]);

        let colors: Vec<_> = catalog
            .colors("al")
            .unwrap()
            .iter()
            .map(|c| c.code.as_str())
            .collect();
        assert_eq!(colors, ["RED", "BLK"]);
    }

    #[test]
    fn looks_up_names() {
        let catalog = catalog();
        assert_eq!(catalog.category_name("BE"), Some("Beta Engine Oil"));
        assert_eq!(catalog.color_name("AL", "red"), Some("Red"));
        assert_eq!(catalog.color_name("BE", "BLK"), None);
        assert!(catalog.colors("ZZ").is_none());
    }

    #[test]
    fn validate_accepts_known_pairs() {
        let catalog = catalog();
        let (keys, special) = catalog
            .validate("al", &["red".into(), "BLK".into()], " x1 ")
            .unwrap();
        assert_eq!(special, "X1");
        assert_eq!(keys[0], AllocationKey::new("AL", "RED").unwrap());
        assert_eq!(keys[1].color(), "BLK");
    }

    #[test]
    fn validate_rejects_bad_requests() {
        let catalog = catalog();
        let reject = |category: &str, colors: &[&str], special: &str| {
            let colors: Vec<String> = colors.iter().map(|c| (*c).to_owned()).collect();
            catalog.validate(category, &colors, special).unwrap_err()
        };
        assert!(reject("ZZ", &["RED"], "").is_rejection());
        assert!(reject("BE", &["BLK"], "").is_rejection());
        assert!(reject("AL", &[], "").is_rejection());
        assert!(reject("AL", &["RED", "red"], "").is_rejection());
        assert!(reject("AL", &["RED"], "a-b").is_rejection());
    }

    #[test]
    fn bad_code_in_file_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.csv");
        fs::write(
            &path,
            "SHORT_CATEGORY,ACTUAL_CATEGORY,SHORT_COLOR,ACTUAL_COLOR\nA L,x,RED,Red\n",
        )
        .unwrap();
        assert!(matches!(
            Catalog::load(&path),
            Err(Error::CorruptRecord { .. })
        ));
    }
}
