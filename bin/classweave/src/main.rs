use classweave::classfile::read_class;
use classweave::transform::FailStrategy;
use classweave::util::dot;
use classweave::{ClassProvider, TransformerManager};

use clap::{Arg, ArgAction, Command};
use std::fs;
use std::io;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use walkdir::WalkDir;

/// Serves classes from a directory tree of `.class` files.
struct DirClassProvider {
    root: PathBuf,
}

impl DirClassProvider {
    fn new(root: impl Into<PathBuf>) -> DirClassProvider {
        DirClassProvider { root: root.into() }
    }
}

impl ClassProvider for DirClassProvider {
    fn get_class(&self, name: &str) -> io::Result<Vec<u8>> {
        let path = self.root.join(format!("{}.class", name.replace('.', "/")));
        fs::read(path)
    }

    fn class_names(&self) -> Vec<String> {
        let mut names = vec![];
        for entry in WalkDir::new(&self.root).into_iter().filter_map(Result::ok) {
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(relative) = entry.path().strip_prefix(&self.root) else {
                continue;
            };
            let Some(stripped) = relative.to_string_lossy().strip_suffix(".class").map(String::from)
            else {
                continue;
            };
            names.push(dot(&stripped.replace('\\', "/")));
        }
        names.sort();
        names
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let matches = Command::new(clap::crate_name!())
        .version(clap::crate_version!())
        .about(clap::crate_description!())
        .arg(
            Arg::new("classpath")
                .long("classpath")
                .value_parser(clap::value_parser!(PathBuf))
                .required(true)
                .action(ArgAction::Set)
                .help("Directory tree the transformer classes are loaded from"),
        )
        .arg(
            Arg::new("transformer")
                .long("transformer")
                .required(true)
                .action(ArgAction::Append)
                .help("Transformer class name, `pkg.*` or `pkg.**` (repeatable)"),
        )
        .arg(
            Arg::new("output")
                .long("output")
                .value_parser(clap::value_parser!(PathBuf))
                .required(true)
                .action(ArgAction::Set)
                .help("Directory transformed class files are written to"),
        )
        .arg(
            Arg::new("fail-fast")
                .long("fail-fast")
                .action(ArgAction::SetTrue)
                .help("Abort a class on the first handler failure instead of continuing"),
        )
        .arg(
            Arg::new("INPUT")
                .value_parser(clap::value_parser!(PathBuf))
                .required(true)
                .action(ArgAction::Append)
                .help("Class files to transform"),
        )
        .get_matches();

    let classpath: &PathBuf = matches.get_one("classpath").unwrap();
    let output: &PathBuf = matches.get_one("output").unwrap();

    let provider = Arc::new(DirClassProvider::new(classpath));
    let manager = TransformerManager::new(provider);
    if matches.get_flag("fail-fast") {
        manager.set_fail_strategy(FailStrategy::Cancel);
    }

    for transformer in matches.get_many::<String>("transformer").unwrap() {
        if let Err(err) = manager.add_transformer(transformer) {
            log::error!("failed to register transformer '{}': {}", transformer, err);
            process::exit(1);
        }
    }

    for input in matches.get_many::<PathBuf>("INPUT").unwrap() {
        let bytes = fs::read(input)?;
        let node = read_class(&bytes)?;
        let name = dot(&node.name);

        let result = manager.transform(&name, &bytes);
        let written: &[u8] = match &result {
            Some(transformed) => {
                log::info!("transformed '{}'", name);
                transformed
            }
            None => {
                log::info!("'{}' unchanged", name);
                &bytes
            }
        };

        let out_path = output.join(format!("{}.class", node.name));
        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&out_path, written)?;
        log::info!("wrote '{}'", out_path.to_string_lossy());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_lists_and_loads_classes() -> io::Result<()> {
        let dir = tempfile::tempdir()?;
        let pkg = dir.path().join("pkg/sub");
        fs::create_dir_all(&pkg)?;
        fs::write(dir.path().join("pkg/A.class"), [0u8])?;
        fs::write(pkg.join("B.class"), [1u8])?;

        let provider = DirClassProvider::new(dir.path());
        assert_eq!(provider.class_names(), vec!["pkg.A", "pkg.sub.B"]);
        assert_eq!(provider.get_class("pkg.sub.B")?, vec![1u8]);
        assert!(provider.get_class("missing.C").is_err());
        Ok(())
    }
}
