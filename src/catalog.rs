//! Resource catalog: descriptors looked up by id or symbolic code.
//!
//! Ships with a built-in set of resources. A TOML file with `[[resource]]`
//! tables can replace it at startup.

use crate::allocation::validate_virtual_sizing;
use crate::error::{Error, Result};
use crate::model::{ResourceDescriptor, ResourceId, Variant};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Top-level TOML wrapper.
#[derive(Debug, Deserialize)]
struct CatalogFile {
    #[serde(default)]
    resource: Vec<ResourceDescriptor>,
}

/// A reference to a resource as a caller supplies it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResourceRef {
    Id(ResourceId),
    Code(String),
}

impl std::str::FromStr for ResourceRef {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(Error::InvalidInput("empty resource reference".to_string()));
        }
        Ok(match s.parse::<i64>() {
            Ok(id) => ResourceRef::Id(ResourceId(id)),
            Err(_) => ResourceRef::Code(s.to_string()),
        })
    }
}

impl std::fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceRef::Id(id) => write!(f, "{id}"),
            ResourceRef::Code(code) => write!(f, "{code}"),
        }
    }
}

impl From<ResourceId> for ResourceRef {
    fn from(id: ResourceId) -> Self {
        ResourceRef::Id(id)
    }
}

impl From<&str> for ResourceRef {
    fn from(code: &str) -> Self {
        ResourceRef::Code(code.to_string())
    }
}

/// Registry of resource descriptors, indexed by id and upper-cased code.
#[derive(Debug, Clone)]
pub struct Catalog {
    resources: HashMap<ResourceId, ResourceDescriptor>,
    codes: HashMap<String, ResourceId>,
}

impl Catalog {
    /// Build a catalog, rejecting duplicates and unusable descriptors.
    pub fn new(resources: impl IntoIterator<Item = ResourceDescriptor>) -> Result<Self> {
        let mut by_id = HashMap::new();
        let mut codes = HashMap::new();

        for r in resources {
            if r.total_units < 1 {
                return Err(Error::Config(format!(
                    "resource {} must have at least one unit",
                    r.code
                )));
            }
            if let Some(vs) = r.virtual_sizing {
                validate_virtual_sizing(vs, r.total_units)
                    .map_err(|e| Error::Config(format!("resource {}: {e}", r.code)))?;
            }
            if codes.insert(r.code.to_uppercase(), r.id).is_some() {
                return Err(Error::Config(format!("duplicate resource code {}", r.code)));
            }
            if by_id.insert(r.id, r).is_some() {
                return Err(Error::Config("duplicate resource id".to_string()));
            }
        }

        Ok(Self {
            resources: by_id,
            codes,
        })
    }

    /// The built-in resource set.
    pub fn builtin() -> Self {
        let seed = vec![
            ResourceDescriptor::new(1, "QURAN", Variant::Paged, 604)
                .name("The Holy Quran")
                .unit_name("Page")
                .virtual_sizing(600, 580),
            ResourceDescriptor::new(2, "CEVSEN", Variant::ListBased, 100)
                .name("Jawshan al-Kabir")
                .unit_name("Section"),
            ResourceDescriptor::new(3, "TEVHIDNAME", Variant::ListBased, 133)
                .name("Tawhidname")
                .unit_name("Section"),
            ResourceDescriptor::new(4, "FETIH", Variant::Joint, 1)
                .name("Surah Al-Fath")
                .unit_name("Count"),
            ResourceDescriptor::new(5, "YASIN", Variant::Joint, 1)
                .name("Surah Ya-Sin")
                .unit_name("Count"),
            ResourceDescriptor::new(6, "BEDIR", Variant::ListBased, 320)
                .name("Companions of Badr")
                .unit_name("Person"),
            ResourceDescriptor::new(7, "UHUD", Variant::ListBased, 70)
                .name("Martyrs of Uhud")
                .unit_name("Person"),
            ResourceDescriptor::new(8, "OZELSALAVAT", Variant::Joint, 1)
                .name("Grand Salawat")
                .unit_name("Count"),
            ResourceDescriptor::new(9, "MUNCIYE", Variant::Countable, 1000)
                .name("Salat al-Munjiyah")
                .unit_name("Count"),
            ResourceDescriptor::new(10, "TEFRICIYE", Variant::Countable, 4444)
                .name("Salat al-Tafrijiyah")
                .unit_name("Count"),
            ResourceDescriptor::new(11, "YALATIF", Variant::Joint, 129)
                .name("Ya Latif")
                .unit_name("Count"),
            ResourceDescriptor::new(12, "YAHAFIZ", Variant::Joint, 998)
                .name("Ya Hafiz")
                .unit_name("Count"),
            ResourceDescriptor::new(13, "YAFETTAH", Variant::Joint, 489)
                .name("Ya Fattah")
                .unit_name("Count"),
            ResourceDescriptor::new(14, "HASBUNALLAH", Variant::Joint, 450)
                .name("Hasbunallah")
                .unit_name("Count"),
            ResourceDescriptor::new(15, "LAHAVLE", Variant::Joint, 199)
                .name("La Hawla")
                .unit_name("Count"),
        ];

        let mut resources = HashMap::new();
        let mut codes = HashMap::new();
        for r in seed {
            codes.insert(r.code.clone(), r.id);
            resources.insert(r.id, r);
        }
        Self { resources, codes }
    }

    /// Load a catalog from a TOML file of `[[resource]]` tables.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            std::io::Error::new(e.kind(), format!("catalog {}: {e}", path.display()))
        })?;
        Self::from_toml(&content).map_err(|e| match e {
            Error::Config(msg) => Error::Config(format!("catalog {}: {msg}", path.display())),
            other => other,
        })
    }

    /// Parse a catalog from TOML text.
    pub fn from_toml(content: &str) -> Result<Self> {
        let file: CatalogFile =
            toml::from_str(content).map_err(|e| Error::Config(e.to_string()))?;
        Self::new(file.resource)
    }

    /// Look up a resource by id.
    pub fn get(&self, id: ResourceId) -> Option<&ResourceDescriptor> {
        self.resources.get(&id)
    }

    /// Look up a resource by symbolic code, ignoring case.
    pub fn by_code(&self, code: &str) -> Option<&ResourceDescriptor> {
        self.codes
            .get(&code.to_uppercase())
            .and_then(|id| self.resources.get(id))
    }

    /// Resolve a caller-supplied reference.
    pub fn resolve(&self, reference: &ResourceRef) -> Result<&ResourceDescriptor> {
        let found = match reference {
            ResourceRef::Id(id) => self.get(*id),
            ResourceRef::Code(code) => self.by_code(code),
        };
        found.ok_or_else(|| Error::NotFound(format!("resource {reference}")))
    }

    /// Every resource, ordered by id.
    pub fn all(&self) -> Vec<&ResourceDescriptor> {
        let mut all: Vec<_> = self.resources.values().collect();
        all.sort_by_key(|r| r.id);
        all
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}

impl Default for Catalog {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Scaling;
    use std::io::Write;

    #[test]
    fn builtin_resolves_by_id_and_code() {
        let catalog = Catalog::builtin();
        assert_eq!(catalog.len(), 15);
        let quran = catalog.resolve(&"quran".parse().unwrap()).unwrap();
        assert_eq!(quran.id, ResourceId(1));
        assert_eq!(quran.total_units, 604);
        assert!(quran.virtual_sizing.is_some());
        let munciye = catalog.resolve(&"9".parse().unwrap()).unwrap();
        assert_eq!(munciye.code, "MUNCIYE");
        assert_eq!(munciye.effective_scaling(), Scaling::Counter);
    }

    #[test]
    fn builtin_passes_validation() {
        let builtin = Catalog::builtin();
        let rebuilt = Catalog::new(builtin.all().into_iter().cloned()).unwrap();
        assert_eq!(rebuilt.len(), builtin.len());
    }

    #[test]
    fn unknown_resource_is_not_found() {
        let catalog = Catalog::builtin();
        assert!(matches!(
            catalog.resolve(&ResourceRef::Code("NOPE".to_string())),
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            catalog.resolve(&ResourceRef::Id(ResourceId(999))),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn loads_toml() {
        let catalog = Catalog::from_toml(
            r#"
            [[resource]]
            id = 1
            code = "book"
            name = "A Book"
            variant = "paged"
            total_units = 210
            virtual_sizing = { virtual_units = 200, linear_boundary = 190 }

            [[resource]]
            id = 2
            code = "names"
            name = "Names"
            unit_name = "Name"
            variant = "list_based"
            total_units = 99
            scaling = "counter"
            "#,
        )
        .unwrap();
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.by_code("BOOK").unwrap().total_units, 210);
        assert_eq!(
            catalog.by_code("names").unwrap().effective_scaling(),
            Scaling::Counter
        );
    }

    #[test]
    fn load_reports_path_once() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            "[[resource]]\nid = 1\ncode = \"A\"\nname = \"A\"\nvariant = \"paged\"\ntotal_units = 0\n"
        )
        .unwrap();

        let err = Catalog::load(file.path()).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        let msg = err.to_string();
        assert!(msg.contains(&file.path().display().to_string()));
        assert_eq!(msg.matches("configuration error").count(), 1, "{msg}");
    }

    #[test]
    fn load_of_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.toml");
        let err = Catalog::load(&path).unwrap_err();
        assert!(matches!(err, Error::Io(_)));
        assert!(err.to_string().contains("missing.toml"));
    }

    #[test]
    fn rejects_duplicate_codes() {
        let result = Catalog::new(vec![
            ResourceDescriptor::new(1, "A", Variant::Paged, 10),
            ResourceDescriptor::new(2, "a", Variant::Paged, 10),
        ]);
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn rejects_bad_virtual_sizing() {
        let result = Catalog::new(vec![
            ResourceDescriptor::new(1, "A", Variant::Paged, 10).virtual_sizing(20, 5),
        ]);
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
