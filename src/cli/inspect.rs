use anyhow::Result;
use clap::Args;
use mender_core_types::Fingerprint;
use selector_candidates::{CandidateGenerator, SelectorCandidate};
use serde::Serialize;

use super::element::{read_element, read_page_elements};
use super::output::{emit, OutputFormat};

#[derive(Args, Clone, Debug)]
pub struct CandidatesArgs {
    /// Element JSON, or @path to a JSON file
    #[arg(value_name = "ELEMENT_JSON|@FILE")]
    pub element: String,

    /// Every element on the page (JSON array or @file), enables uniqueness checks
    #[arg(long, value_name = "ELEMENTS_JSON|@FILE")]
    pub page: Option<String>,

    /// Show at most this many candidates
    #[arg(long)]
    pub limit: Option<usize>,
}

#[derive(Args, Clone, Debug)]
pub struct FingerprintArgs {
    /// Element JSON, or @path to a JSON file
    #[arg(value_name = "ELEMENT_JSON|@FILE")]
    pub element: String,
}

#[derive(Serialize)]
struct FingerprintView {
    fingerprint: Fingerprint,
    tag_name: String,
    text: String,
}

pub async fn cmd_candidates(args: CandidatesArgs, output: OutputFormat) -> Result<()> {
    let element = read_element(&args.element).await?;
    let page = match args.page.as_deref() {
        Some(raw) => Some(read_page_elements(raw).await?),
        None => None,
    };

    let mut candidates = CandidateGenerator::new().generate(&element, page.as_deref(), None);
    if let Some(limit) = args.limit {
        candidates.truncate(limit);
    }

    emit(output, &candidates, |candidates: &Vec<SelectorCandidate>| {
        if candidates.is_empty() {
            println!("No selector candidates for <{}>", element.tag_name);
            return;
        }
        for (rank, candidate) in candidates.iter().enumerate() {
            let unique = if candidate.is_unique { "" } else { "  (not unique)" };
            println!(
                "{:>2}. {:.3}  {:<13} {}{}",
                rank + 1,
                candidate.score,
                candidate.strategy.name(),
                candidate.selector,
                unique
            );
        }
    })
}

pub async fn cmd_fingerprint(args: FingerprintArgs, output: OutputFormat) -> Result<()> {
    let element = read_element(&args.element).await?;
    let view = FingerprintView {
        fingerprint: Fingerprint::of(&element),
        text: element.trimmed_text().to_string(),
        tag_name: element.tag_name,
    };
    emit(output, &view, |view| println!("{}", view.fingerprint))
}
