//! CLI: check JSON documents against a schema document, or print it back.
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use rayon::prelude::*;
use serde_json::Value;
use tracing::{info, warn};

use json_guard::{AnnotationRegistry, Compiler, Guard, Schema, SchemaDocument};

// ————————————————————————————————————————————————————————————————————————————
// TYPES
// ————————————————————————————————————————————————————————————————————————————

/// validate JSON/NDJSON documents against a json-guard schema document
#[derive(Parser, Debug)]
#[command(name = "json-guard", version, about)]
pub struct CommandLineInterface {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// check every input document and report PASS/FAIL per document
    Check(CheckOut),
    /// print the normalized schema document
    Describe(DescribeOut),
    /// list the built-in annotation tags
    Annotations,
}

#[derive(Args, Debug, Clone)]
struct InputSettings {
    /// treat input as newline-delimited JSON (NDJSON)
    #[arg(long, default_value_t = false)]
    ndjson: bool,

    /// JSON Pointer to select a subnode in each document (e.g. /data/items/0/payload)
    #[arg(long)]
    json_pointer: Option<String>,

    /// JQ pre-process filter for each document.
    #[arg(long)]
    jq_expr: Option<String>,

    /// One or more inputs. May be literal paths or quoted glob patterns or '-' for stdin
    #[arg(long, short, num_args = 1.., required = true)]
    input: Vec<String>,
}

#[derive(clap::Parser, Debug)]
struct CheckOut {
    /// schema document (.json)
    #[arg(long, short)]
    schema: PathBuf,

    #[command(flatten)]
    input_settings: InputSettings,

    /// only print failing documents
    #[arg(long, short)]
    quiet: bool,
}

#[derive(clap::Parser, Debug)]
struct DescribeOut {
    /// schema document (.json)
    #[arg(long, short)]
    schema: PathBuf,

    /// output .json file (stdout if omitted)
    #[arg(short, long)]
    out: Option<PathBuf>,
}

/// One JSON value to check, labelled with where it came from.
#[derive(Debug, Clone)]
struct Document {
    source: String,
    value: Value,
}

// ————————————————————————————————————————————————————————————————————————————
// IMPLEMENTATION
// ————————————————————————————————————————————————————————————————————————————

impl InputSettings {
    fn load_documents(&self) -> Result<Vec<Document>> {
        let mut documents = Vec::new();
        for source in resolve_file_path_patterns(&self.input)? {
            let (label, text) = read_source(&source)?;
            let parsed = if self.ndjson {
                text.lines()
                    .enumerate()
                    .filter(|(_, line)| !line.trim().is_empty())
                    .map(|(i, line)| {
                        let label = format!("{label}:{}", i + 1);
                        serde_json::from_str::<Value>(line)
                            .with_context(|| format!("Failed to parse NDJSON line ({label})"))
                            .map(|value| Document { source: label, value })
                    })
                    .collect::<Result<Vec<_>>>()?
            } else {
                let value = serde_json::from_str::<Value>(&text)
                    .with_context(|| format!("Failed to parse JSON source file ({label})"))?;
                vec![Document { source: label, value }]
            };
            for document in parsed {
                self.preprocess(document, &mut documents)?;
            }
        }
        info!(documents = documents.len(), "inputs loaded");
        Ok(documents)
    }

    /// Apply `--json-pointer` then `--jq-expr`.
    fn preprocess(&self, document: Document, out: &mut Vec<Document>) -> Result<()> {
        let Document { source, value } = document;
        let value = match self.json_pointer.as_deref() {
            None => value,
            Some(pointer) => match value.pointer(pointer) {
                Some(selected) => selected.clone(),
                None => {
                    warn!(%source, pointer, "JSON pointer matched nothing; document skipped");
                    return Ok(());
                }
            },
        };
        match self.jq_expr.as_deref() {
            None => out.push(Document { source, value }),
            Some(jq_expr) => {
                let results = crate::jq_exec::run_jaq(jq_expr, &value)
                    .with_context(|| format!("Failed to apply jq expression to source file ({source})"))?;
                for (i, value) in results.into_iter().enumerate() {
                    out.push(Document { source: format!("{source}#{i}"), value });
                }
            }
        }
        Ok(())
    }
}

impl CommandLineInterface {
    pub fn load() -> Self {
        Self::parse()
    }
    pub fn run(&self) -> Result<ExitCode> {
        match &self.cmd {
            Command::Check(target) => {
                let schema = load_schema(&target.schema)?;
                let guard = Compiler::new()
                    .guard_for(&schema)
                    .with_context(|| format!("Failed to compile schema ({})", target.schema.display()))?;
                let documents = target.input_settings.load_documents()?;
                let failed = report(&guard, &documents, target.quiet);
                Ok(if failed == 0 { ExitCode::SUCCESS } else { ExitCode::FAILURE })
            }
            Command::Describe(target) => {
                let schema = load_schema(&target.schema)?;
                let document = SchemaDocument::from_meta(schema.meta());
                let document_src = serde_json::to_string_pretty(&document)?;
                if let Some(out) = target.out.as_ref() {
                    if let Some(parent) = out.parent() {
                        std::fs::create_dir_all(parent)?;
                    }
                    std::fs::write(out, &document_src)
                        .with_context(|| format!("Failed to write {}", out.display()))?;
                } else {
                    println!("{document_src}");
                }
                Ok(ExitCode::SUCCESS)
            }
            Command::Annotations => {
                for tag in AnnotationRegistry::with_builtins().tags() {
                    println!("{tag}");
                }
                Ok(ExitCode::SUCCESS)
            }
        }
    }
}

// ————————————————————————————————————————————————————————————————————————————
// INTERNAL HELPERS
// ————————————————————————————————————————————————————————————————————————————

fn load_schema(path: &Path) -> Result<Schema> {
    let document = SchemaDocument::from_path(path)?;
    let schema = document
        .into_schema()
        .with_context(|| format!("Invalid schema document ({})", path.display()))?;
    Ok(schema)
}

/// Print one line per document; return the number of failures.
fn report(guard: &Guard, documents: &[Document], quiet: bool) -> usize {
    let verdicts: Vec<bool> = documents.par_iter().map(|d| guard.is(&d.value)).collect();
    let mut failed = 0;
    for (document, ok) in documents.iter().zip(verdicts) {
        if ok {
            if !quiet {
                println!("{} {}", "PASS".green(), document.source);
            }
        } else {
            failed += 1;
            println!("{} {}", "FAIL".red().bold(), document.source);
        }
    }
    let passed = documents.len() - failed;
    println!("{passed} passed, {failed} failed");
    failed
}

fn read_source(source: &Path) -> Result<(String, String)> {
    if source == Path::new("-") {
        let mut text = String::new();
        std::io::stdin().read_to_string(&mut text).context("Failed to read stdin")?;
        return Ok(("<stdin>".to_string(), text));
    }
    let label = source.to_string_lossy().to_string();
    let text = std::fs::read_to_string(source)
        .with_context(|| format!("Failed to read source file ({label})"))?;
    Ok((label, text))
}

fn resolve_file_path_patterns<I>(patterns: I) -> Result<Vec<PathBuf>>
where
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    fn has_glob_chars(s: &str) -> bool {
        // Minimal glob detection for the `glob` crate syntax.
        s.bytes().any(|b| matches!(b, b'*' | b'?' | b'[' | b'{' ))
    }

    let mut out = Vec::<PathBuf>::new();

    for raw in patterns {
        let pattern = raw.as_ref();

        if has_glob_chars(pattern) {
            let mut matched_any = false;
            for entry in glob::glob(pattern)? {
                out.push(entry?);
                matched_any = true;
            }
            if !matched_any {
                bail!("glob pattern matched no files: {pattern}");
            }
        } else {
            // literal path, or '-' for stdin
            out.push(PathBuf::from(pattern));
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn settings(input: Vec<String>) -> InputSettings {
        InputSettings { ndjson: false, json_pointer: None, jq_expr: None, input }
    }

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        CommandLineInterface::command().debug_assert();
    }

    #[test]
    fn json_pointer_selects_or_skips() {
        let mut s = settings(vec![]);
        s.json_pointer = Some("/payload".into());
        let mut out = Vec::new();
        s.preprocess(Document { source: "a".into(), value: json!({"payload": [1]}) }, &mut out).unwrap();
        s.preprocess(Document { source: "b".into(), value: json!({"other": 1}) }, &mut out).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].value, json!([1]));
    }

    #[test]
    fn jq_outputs_become_documents() {
        let mut s = settings(vec![]);
        s.jq_expr = Some(".[]".into());
        let mut out = Vec::new();
        s.preprocess(Document { source: "f".into(), value: json!([1, 2]) }, &mut out).unwrap();
        let sources: Vec<_> = out.iter().map(|d| d.source.as_str()).collect();
        assert_eq!(sources, ["f#0", "f#1"]);
    }

    #[test]
    fn unmatched_glob_is_an_error() {
        assert!(resolve_file_path_patterns(["/definitely/not/here/*.json"]).is_err());
        let literal = resolve_file_path_patterns(["-"]).unwrap();
        assert_eq!(literal, vec![PathBuf::from("-")]);
    }

    #[test]
    fn report_counts_failures() {
        let guard = json_guard::guard::number();
        let documents = vec![
            Document { source: "a".into(), value: json!(1) },
            Document { source: "b".into(), value: json!("x") },
        ];
        assert_eq!(report(&guard.erase(), &documents, true), 1);
    }
}
