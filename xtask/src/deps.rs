// Licensed under the Apache-2.0 license

use crate::PROJECT_ROOT;
use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use toml::{Table, Value};

const IGNORE_DIRS: &[&str] = &[".git", "examples", "target"];
const DEP_TABLES: &[&str] = &["dependencies", "dev-dependencies", "build-dependencies"];

/// Every crate must take its dependencies from `[workspace.dependencies]`.
pub(crate) fn check() -> Result<()> {
    println!("Running: workspace dependency check");
    let mut okay = true;
    for toml_path in find_cargo_tomls(&PROJECT_ROOT)? {
        let data = std::fs::read_to_string(&toml_path)
            .with_context(|| format!("reading {}", toml_path.display()))?;
        let value = data
            .parse::<Table>()
            .with_context(|| format!("parsing {}", toml_path.display()))?;
        for table in DEP_TABLES {
            let Some(deps) = value.get(*table).and_then(Value::as_table) else {
                continue;
            };
            for (k, v) in deps {
                if !from_workspace(v) {
                    okay = false;
                    println!(
                        "  {}: [{table}] {k} should be {k}.workspace = true but was {k} = {v}",
                        toml_path.display()
                    );
                }
            }
        }
    }
    if !okay {
        bail!("Dependency check failed");
    }
    Ok(())
}

fn from_workspace(dep: &Value) -> bool {
    dep.as_table()
        .and_then(|t| t.get("workspace"))
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

fn find_cargo_tomls(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut result = vec![];
    let walker = walkdir::WalkDir::new(dir).into_iter().filter_entry(|e| {
        e.depth() == 0
            || !e
                .file_name()
                .to_str()
                .is_some_and(|name| IGNORE_DIRS.contains(&name))
    });
    for entry in walker {
        let entry = entry?;
        // The workspace manifest declares the versions.
        if entry.depth() > 0 && entry.file_name() == "Cargo.toml" {
            result.push(entry.into_path());
        }
    }
    result.sort();
    Ok(result)
}
