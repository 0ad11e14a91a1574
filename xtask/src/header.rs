// Licensed under the Apache-2.0 license

use crate::PROJECT_ROOT;
use anyhow::{bail, Result};
use std::{
    fs::File,
    io::{BufRead, BufReader, Error, ErrorKind},
    path::{Path, PathBuf},
};
use walkdir::DirEntry;

const REQUIRED_TEXT: &str = "Licensed under the Apache-2.0 license";
const EXTENSIONS: &[&str] = &["rs", "toml", "sh", "py", "yml", "yaml"];
const IGNORED_PATHS: &[&str] = &[".github/dependabot.yml"];
const IGNORED_DIRS: &[&str] = &[".git", "examples", "out", "target"];

pub(crate) fn fix() -> Result<()> {
    println!("Running: license header fix");

    let files = find_files(&PROJECT_ROOT, EXTENSIONS, false)?;
    let mut failed = false;
    for file in files.iter() {
        if check_file(file).is_err() {
            println!("Fixing header in {}", remove_root(file));
            fix_file(file)?;
        }
        if let Err(e) = check_file(file) {
            println!("{e}");
            failed = true;
        }
    }
    if failed {
        bail!("License header fix failed; please fix the above files manually.");
    }
    Ok(())
}

pub(crate) fn check() -> Result<()> {
    println!("Running: license header check");
    let files = find_files(&PROJECT_ROOT, EXTENSIONS, false)?;
    let mut failed = false;
    for file in files.iter() {
        if let Err(e) = check_file(file) {
            println!("{e}");
            failed = true;
        }
    }
    if failed {
        bail!("Some files failed to have the correct license header; to fix, run \"cargo xtask header-fix\" from the repo root");
    }
    Ok(())
}

fn remove_root(path: &Path) -> String {
    path.strip_prefix(&*PROJECT_ROOT)
        .unwrap_or(path)
        .to_string_lossy()
        .into_owned()
}

fn add_path_walkdir_error(path: &Path) -> impl Fn(walkdir::Error) -> Error + Copy + '_ {
    move |e: walkdir::Error| {
        let path = remove_root(path);
        match e.io_error() {
            Some(e) => Error::new(e.kind(), format!("{path:?}: {e}")),
            None => Error::new(ErrorKind::Other, format!("{path:?}: {e}")),
        }
    }
}

fn add_path(path: &Path) -> impl Fn(Error) -> Error + Copy + '_ {
    move |e: Error| {
        let path = remove_root(path);
        Error::new(e.kind(), format!("{path:?}: {e}"))
    }
}

fn check_file_contents(path: &Path, contents: impl BufRead) -> Result<(), Error> {
    const N: usize = 3;
    let wrap_err = add_path(path);

    for line in contents.lines().take(N) {
        if line.map_err(wrap_err)?.contains(REQUIRED_TEXT) {
            return Ok(());
        }
    }
    let path = remove_root(path);
    Err(Error::new(
        ErrorKind::Other,
        format!("File {path:?} doesn't contain {REQUIRED_TEXT:?} in the first {N} lines"),
    ))
}

fn check_file(path: &Path) -> Result<(), Error> {
    let wrap_err = add_path(path);
    check_file_contents(path, BufReader::new(File::open(path).map_err(wrap_err)?))
}

fn fix_file(path: &Path) -> Result<(), Error> {
    let wrap_err = add_path(path);

    let mut contents = Vec::from(match path.extension().and_then(|s| s.to_str()) {
        Some("rs") => format!("// {REQUIRED_TEXT}\n"),
        Some("toml" | "sh" | "py" | "yaml" | "yml") => format!("# {REQUIRED_TEXT}\n"),
        other => {
            return Err(Error::new(
                ErrorKind::Other,
                format!("Unknown extension {other:?}"),
            ))
        }
    });
    let mut prev_contents = std::fs::read(path).map_err(wrap_err)?;
    if prev_contents.first() != Some(&b'\n') {
        contents.push(b'\n');
    }
    contents.append(&mut prev_contents);
    std::fs::write(path, contents).map_err(wrap_err)
}

fn allow(file: &DirEntry) -> bool {
    let file_path = remove_root(file.path());
    if IGNORED_PATHS.contains(&file_path.as_str()) {
        return false;
    }
    let file_type = file.file_type();
    if file_type.is_dir() {
        if let Some(file_name) = file.file_name().to_str() {
            if IGNORED_DIRS.contains(&file_name) {
                return false;
            }
        }
    }
    true
}

pub(crate) fn find_files(
    dir: &Path,
    extensions: &[&str],
    ignore_none: bool,
) -> Result<Vec<PathBuf>, Error> {
    let mut result = vec![];
    let wrap_err = add_path_walkdir_error(dir);
    let walker = walkdir::WalkDir::new(dir).into_iter();
    for file in walker.filter_entry(|f| ignore_none || allow(f)) {
        let file = file.map_err(wrap_err)?;
        let file_path = &file.path();
        let file_type = file.file_type();
        if let Some(Some(extension)) = file.path().extension().map(|s| s.to_str()) {
            if file_type.is_file() && extensions.contains(&extension) {
                result.push(file_path.into());
            }
        }
    }
    result.sort();
    Ok(result)
}
