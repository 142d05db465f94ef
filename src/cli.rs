//! Interactive shell and model management.

use std::io::Write as _;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use tokio::io::AsyncWriteExt;

use crate::brain::MemoryEngine;

const MODEL_URL: &str =
    "https://huggingface.co/sentence-transformers/all-MiniLM-L6-v2/resolve/main/onnx/model.onnx";
const TOKENIZER_URL: &str =
    "https://huggingface.co/sentence-transformers/all-MiniLM-L6-v2/resolve/main/tokenizer.json";

/// Read-eval loop over stdin. Slash commands manage memory; any other input
/// is remembered and answered with recalled context.
pub async fn run_shell(engine: &mut MemoryEngine) -> Result<()> {
    println!("\n{}", "=".repeat(40));
    println!("   engram - local memory for AI agents");
    println!("{}", "=".repeat(40));
    println!("\ncommands:");
    println!("  /learn <url>    ->  ingest a website into long-term memory");
    println!("  /read <path>    ->  ingest local files or a folder");
    println!("  /status         ->  show memory stats");
    println!("  /forget         ->  clear the semantic cache");
    println!("  /exit           ->  close the session");
    println!("  <text>          ->  remember and recall");
    println!("{}\n", "-".repeat(40));

    let stdin = std::io::stdin();
    loop {
        print!("\n[USER]: ");
        std::io::stdout().flush()?;

        let mut line = String::new();
        if stdin.read_line(&mut line)? == 0 {
            break; // EOF
        }
        let input = line.trim();
        if input.is_empty() {
            continue;
        }

        match input {
            "/exit" => {
                println!("[SYSTEM]: Shutting down memory core. Goodbye.");
                break;
            }
            "/status" => {
                let status = engine.status()?;
                println!(
                    "[SYSTEM]: long_term={} short_term={} cache={}/{}",
                    status.long_term_count,
                    status.short_term_count,
                    status.cache_size,
                    status.cache_max
                );
            }
            "/forget" => {
                engine.forget_cache();
                println!("[SYSTEM]: Semantic cache cleared.");
            }
            _ if input.starts_with("/learn ") => {
                let url = input["/learn ".len()..].trim();
                println!("[SYSTEM]: Deploying spider to {url}...");
                match engine.learn_url(url, false, 10).await {
                    Ok(count) => {
                        println!("[SYSTEM]: Success. Absorbed {count} knowledge chunks.")
                    }
                    Err(e) => println!("[ERROR]: Failed to ingest. {e:#}"),
                }
            }
            _ if input.starts_with("/read ") => {
                let path = Path::new(input["/read ".len()..].trim());
                println!("[SYSTEM]: Ingesting local data from {}...", path.display());
                let result = if path.is_dir() {
                    engine.learn_folder(path)
                } else {
                    engine.learn_doc(path, None)
                };
                match result {
                    Ok(count) => println!("[SYSTEM]: Success. Indexed {count} chunks."),
                    Err(e) => println!("[ERROR]: Could not read path. {e:#}"),
                }
            }
            _ if input.starts_with('/') => {
                println!("[SYSTEM]: Unknown command: {input}");
            }
            _ => {
                engine.add_memory(input)?;
                println!("[SYSTEM]: Searching vector space...");
                let n = engine.default_results();
                let response = engine.recall(input, n, true)?;

                println!("\n[RECALLED CONTEXT]:");
                println!("{}", "-".repeat(40));
                println!("{response}");
                println!("{}", "-".repeat(40));
            }
        }
    }

    Ok(())
}

/// Download the ONNX embedding model and tokenizer to the cache directory.
pub async fn model_download(config: &crate::config::EmbeddingConfig) -> Result<()> {
    let cache_dir = crate::config::expand_tilde(&config.cache_dir);
    std::fs::create_dir_all(&cache_dir)
        .with_context(|| format!("failed to create cache dir: {}", cache_dir.display()))?;

    let model_path = cache_dir.join("model.onnx");
    let tokenizer_path = cache_dir.join("tokenizer.json");

    if model_path.exists() {
        println!("Model already exists at {}", model_path.display());
    } else {
        println!("Downloading model.onnx (~90MB)...");
        download_file(MODEL_URL, &model_path).await?;
        println!("Model saved to {}", model_path.display());
    }

    if tokenizer_path.exists() {
        println!("Tokenizer already exists at {}", tokenizer_path.display());
    } else {
        println!("Downloading tokenizer.json...");
        download_file(TOKENIZER_URL, &tokenizer_path).await?;
        println!("Tokenizer saved to {}", tokenizer_path.display());
    }

    println!("Model download complete. Ready for use.");
    Ok(())
}

/// Download a file from a URL with progress bar. Uses atomic write (tmp + rename).
async fn download_file(url: &str, dest: &PathBuf) -> Result<()> {
    let response = reqwest::get(url)
        .await
        .with_context(|| format!("HTTP request failed for {url}"))?;

    anyhow::ensure!(
        response.status().is_success(),
        "download failed with HTTP {}",
        response.status()
    );

    let total_size = response.content_length();
    let pb = if let Some(size) = total_size {
        let pb = ProgressBar::new(size);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("  {bar:40.cyan/blue} {bytes}/{total_bytes} ({eta})")
                .expect("valid template")
                .progress_chars("##-"),
        );
        pb
    } else {
        ProgressBar::new_spinner()
    };

    let tmp_path = dest.with_extension("tmp");
    let mut file = tokio::fs::File::create(&tmp_path)
        .await
        .with_context(|| format!("failed to create temp file: {}", tmp_path.display()))?;

    let bytes = response.bytes().await.context("error reading response")?;
    pb.inc(bytes.len() as u64);
    file.write_all(&bytes)
        .await
        .context("error writing to file")?;

    file.flush().await?;
    drop(file);

    tokio::fs::rename(&tmp_path, dest)
        .await
        .context("failed to rename temp file")?;

    pb.finish_and_clear();
    Ok(())
}
