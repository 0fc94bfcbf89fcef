use crate::Result;

/// Tables whose rows are session, log or history data and are skipped by default
pub const DEFAULT_NO_DATA_TABLES: &[&str] = &[
    "be_sessions",
    "fe_sessions",
    "fe_users",
    "sys_history",
    "sys_http_report",
    "sys_lockedrecords",
    "sys_log",
];

pub const DEFAULT_CACHE_TABLE_PREFIX: &str = "cache_";

/// The part of the database layer the dump needs to know about
pub trait TableCatalog {
    fn database_name(&self) -> &str;

    /// Table names in catalog order
    fn list_table_names(&self) -> Result<Vec<String>>;
}

/// Which rows to leave out of a dump
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExclusionOptions {
    /// Tables named explicitly by the caller
    pub no_data_tables: Vec<String>,
    pub include_cache_data: bool,
    pub include_default_no_data: bool,
    /// An empty prefix matches no table and skips the catalog lookup
    pub cache_table_prefix: String,
    pub default_no_data_tables: Vec<String>,
}

impl Default for ExclusionOptions {
    fn default() -> Self {
        Self {
            no_data_tables: Vec::new(),
            include_cache_data: false,
            include_default_no_data: false,
            cache_table_prefix: DEFAULT_CACHE_TABLE_PREFIX.to_string(),
            default_no_data_tables: DEFAULT_NO_DATA_TABLES
                .iter()
                .map(|table| table.to_string())
                .collect(),
        }
    }
}

/// Ordered no-data table list for one export; duplicates are harmless
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DumpSpec {
    pub no_data_tables: Vec<String>,
}

impl DumpSpec {
    /// Compute the exclusion set: caller tables, then cache tables, then the defaults
    pub fn resolve(catalog: &dyn TableCatalog, options: &ExclusionOptions) -> Result<Self> {
        let mut no_data_tables = options.no_data_tables.clone();

        if !options.include_cache_data && !options.cache_table_prefix.is_empty() {
            let tables = catalog.list_table_names()?;
            no_data_tables.extend(
                tables
                    .into_iter()
                    .filter(|table| table.starts_with(&options.cache_table_prefix)),
            );
        }

        if !options.include_default_no_data {
            no_data_tables.extend(options.default_no_data_tables.iter().cloned());
        }

        Ok(Self { no_data_tables })
    }

    /// The two passes of an export, in output order
    pub fn passes(&self) -> [DumpPass; 2] {
        [
            DumpPass::Schema,
            DumpPass::Data {
                ignore_tables: self.no_data_tables.clone(),
            },
        ]
    }
}

/// One invocation of the dump tool
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DumpPass {
    /// Table definitions for every table, no rows
    Schema,
    /// Rows only, skipping the listed tables entirely
    Data { ignore_tables: Vec<String> },
}

impl DumpPass {
    pub fn label(&self) -> &'static str {
        match self {
            DumpPass::Schema => "schema",
            DumpPass::Data { .. } => "data",
        }
    }

    /// Mode flags appended after the connection arguments
    pub fn args(&self, database: &str) -> Vec<String> {
        let mut args = vec!["--single-transaction".to_string()];
        match self {
            DumpPass::Schema => args.push("--no-data".to_string()),
            DumpPass::Data { ignore_tables } => {
                args.push("--no-create-info".to_string());
                args.extend(
                    ignore_tables
                        .iter()
                        .map(|table| format!("--ignore-table={database}.{table}")),
                );
            }
        }
        args
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    struct StaticCatalog {
        tables: Vec<&'static str>,
        calls: Cell<usize>,
    }

    impl StaticCatalog {
        fn new(tables: Vec<&'static str>) -> Self {
            Self {
                tables,
                calls: Cell::new(0),
            }
        }
    }

    impl TableCatalog for StaticCatalog {
        fn database_name(&self) -> &str {
            "site"
        }

        fn list_table_names(&self) -> Result<Vec<String>> {
            self.calls.set(self.calls.get() + 1);
            Ok(self.tables.iter().map(|t| t.to_string()).collect())
        }
    }

    fn catalog() -> StaticCatalog {
        StaticCatalog::new(vec![
            "be_users",
            "cache_pages",
            "cache_rootline",
            "pages",
            "sys_log",
            "tt_content",
            "my_cache_table",
        ])
    }

    #[test]
    fn test_default_exclusions() {
        let spec = DumpSpec::resolve(&catalog(), &ExclusionOptions::default()).unwrap();

        let mut expected = vec!["cache_pages".to_string(), "cache_rootline".to_string()];
        expected.extend(DEFAULT_NO_DATA_TABLES.iter().map(|t| t.to_string()));
        assert_eq!(spec.no_data_tables, expected);
    }

    #[test]
    fn test_caller_tables_come_first() {
        let options = ExclusionOptions {
            no_data_tables: vec!["tx_news".to_string(), "sys_log".to_string()],
            include_default_no_data: true,
            ..ExclusionOptions::default()
        };
        let spec = DumpSpec::resolve(&catalog(), &options).unwrap();

        assert_eq!(
            spec.no_data_tables,
            vec!["tx_news", "sys_log", "cache_pages", "cache_rootline"]
        );
    }

    #[test]
    fn test_include_everything() {
        let catalog = catalog();
        let options = ExclusionOptions {
            include_cache_data: true,
            include_default_no_data: true,
            ..ExclusionOptions::default()
        };
        let spec = DumpSpec::resolve(&catalog, &options).unwrap();

        assert!(spec.no_data_tables.is_empty());
        // The catalog is only consulted for cache tables
        assert_eq!(catalog.calls.get(), 0);
    }

    #[test]
    fn test_empty_cache_prefix_excludes_nothing() {
        let catalog = catalog();
        let options = ExclusionOptions {
            cache_table_prefix: String::new(),
            include_default_no_data: true,
            ..ExclusionOptions::default()
        };
        let spec = DumpSpec::resolve(&catalog, &options).unwrap();

        assert!(spec.no_data_tables.is_empty());
        assert_eq!(catalog.calls.get(), 0);
    }

    #[test]
    fn test_every_cache_table_ignored_once() {
        let options = ExclusionOptions {
            include_default_no_data: true,
            ..ExclusionOptions::default()
        };
        let spec = DumpSpec::resolve(&catalog(), &options).unwrap();
        let args = spec.passes()[1].args("site");

        for table in ["cache_pages", "cache_rootline"] {
            let flag = format!("--ignore-table=site.{table}");
            assert_eq!(args.iter().filter(|arg| **arg == flag).count(), 1);
        }
        assert!(!args.iter().any(|arg| arg.ends_with("my_cache_table")));
    }

    #[test]
    fn test_duplicates_tolerated() {
        let options = ExclusionOptions {
            no_data_tables: vec!["sys_log".to_string()],
            include_cache_data: true,
            ..ExclusionOptions::default()
        };
        let spec = DumpSpec::resolve(&catalog(), &options).unwrap();

        let sys_log = spec
            .no_data_tables
            .iter()
            .filter(|t| t.as_str() == "sys_log")
            .count();
        assert_eq!(sys_log, 2);
    }

    #[test]
    fn test_pass_args() {
        let spec = DumpSpec {
            no_data_tables: vec!["sys_log".to_string(), "cache_pages".to_string()],
        };
        let [schema, data] = spec.passes();

        assert_eq!(schema.label(), "schema");
        assert_eq!(schema.args("site"), vec!["--single-transaction", "--no-data"]);

        assert_eq!(data.label(), "data");
        assert_eq!(
            data.args("site"),
            vec![
                "--single-transaction",
                "--no-create-info",
                "--ignore-table=site.sys_log",
                "--ignore-table=site.cache_pages",
            ]
        );
    }
}
