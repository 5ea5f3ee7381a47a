mod collector;
mod config;
mod error;
mod limiter;
mod pager;
mod report;
mod tally;

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use govscope_core::{build_matrix, Delegate, Proposal};

use crate::collector::{CollectorSettings, VoteCollector};
use crate::config::AppConfig;
use crate::limiter::RateLimiter;
use crate::pager::{Pager, RetryPolicy};
use crate::tally::queries::{
    DelegatesByOrganization, OrganizationBySlug, ProposalsByOrganization, ORGANIZATION_QUERY,
};
use crate::tally::{GraphqlTransport, TallyClient};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "govscope=info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_level(true),
        )
        .init();

    println!("================================================");
    println!("        GOVSCOPE - DAO Voting Matrix            ");
    println!("================================================");

    let config = AppConfig::load().map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))?;

    if config.tally.api_key.is_empty() {
        anyhow::bail!("Tally API key is not set. Set GOVSCOPE__TALLY__API_KEY and re-run.");
    }
    if config.scrape.organization.is_empty() {
        anyhow::bail!("No organization configured. Set GOVSCOPE__SCRAPE__ORGANIZATION and re-run.");
    }

    println!("[CONFIG] Endpoint: {}", config.tally.endpoint);
    println!("[CONFIG] Organization: {}", config.scrape.organization);
    println!("[CONFIG] API key: {}", mask_key(&config.tally.api_key));
    println!(
        "[CONFIG] Pacing: {:.2} req/s, {} workers",
        config.scrape.requests_per_second, config.scrape.workers
    );

    tracing::info!(
        organization = %config.scrape.organization,
        workers = %config.scrape.workers,
        "Starting Govscope run"
    );

    let limiter = Arc::new(RateLimiter::new(config.scrape.requests_per_second));
    let client: Arc<dyn GraphqlTransport> = Arc::new(TallyClient::new(&config.tally, limiter)?);
    let retry = RetryPolicy {
        max_attempts: config.scrape.max_attempts.max(1),
        rate_limit_cooldown: Duration::from_secs(config.scrape.rate_limit_cooldown_seconds),
        ..RetryPolicy::default()
    };

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                println!();
                println!("[SIGNAL] Ctrl-C received; keeping fetched work, writing partial results...");
                cancel.cancel();
            }
        });
    }
    if let Some(secs) = config.scrape.run_timeout_seconds {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(secs)).await;
            println!("[TIMEOUT] Run timeout reached; writing partial results...");
            cancel.cancel();
        });
    }

    // Resolve the organization slug to its id.
    println!("[TALLY] Resolving organization '{}'...", config.scrape.organization);
    let org_query = OrganizationBySlug {
        slug: config.scrape.organization.clone(),
    };
    let data = retry
        .execute(client.as_ref(), ORGANIZATION_QUERY, org_query.variables())
        .await?;
    let org = OrganizationBySlug::extract(data)?;
    println!(
        "[TALLY] Organization {} (id {}): {} proposals, {} delegates reported",
        org.name.as_deref().unwrap_or(&config.scrape.organization),
        org.id,
        org.proposals_count.unwrap_or(0),
        org.delegates_count.unwrap_or(0),
    );

    // Proposal listing.
    let proposals: Vec<Proposal> = Pager::new(
        client.clone(),
        ProposalsByOrganization {
            organization_id: org.id.clone(),
        },
        config.scrape.page_size,
        config.scrape.max_pages,
        retry.clone(),
    )
    .collect_all()
    .await?;
    println!("[TALLY] {} proposals fetched", proposals.len());
    tracing::info!(count = %proposals.len(), "fetched proposals");

    if proposals.is_empty() {
        println!("[TALLY] No proposals found for this organization; writing empty reports.");
        let report = build_matrix(Vec::new(), &[], &[])?;
        let paths = report::write_reports(
            Path::new(&config.output.dir),
            &config.scrape.organization,
            &report,
            &[],
        )?;
        print_paths(&paths);
        return Ok(());
    }

    // Delegate listing; repeated addresses keep their first occurrence.
    let raw_delegates: Vec<Delegate> = Pager::new(
        client.clone(),
        DelegatesByOrganization {
            organization_id: org.id.clone(),
        },
        config.scrape.page_size,
        config.scrape.max_pages,
        retry.clone(),
    )
    .collect_all()
    .await?;
    let delegates = dedupe_delegates(raw_delegates);
    println!("[TALLY] {} delegates fetched", delegates.len());
    tracing::info!(count = %delegates.len(), "fetched delegates");

    // Vote collection across all proposals.
    println!(
        "[COLLECT] Fetching votes for {} proposals ({} workers)...",
        proposals.len(),
        config.scrape.workers
    );
    let collector = VoteCollector::new(
        client.clone(),
        CollectorSettings {
            workers: config.scrape.workers,
            page_size: config.scrape.vote_page_size,
            max_pages: config.scrape.max_pages,
            retry: retry.clone(),
        },
    );
    let collected = collector.collect(&proposals, &delegates, cancel.clone()).await?;
    println!(
        "[COLLECT] {} votes collected, {} proposal(s) skipped or incomplete",
        collected.records.len(),
        collected.failures.len()
    );

    // Aggregation. An invariant violation here means the summaries would
    // be untrustworthy, so the run fails rather than emitting them.
    let matrix = build_matrix(collected.records, &delegates, &proposals)
        .map_err(|e| anyhow::anyhow!("aggregation invariant violated: {}", e))?;

    let paths = report::write_reports(
        Path::new(&config.output.dir),
        &config.scrape.organization,
        &matrix,
        &collected.failures,
    )?;
    print_paths(&paths);

    if !collected.failures.is_empty() {
        println!(
            "[WARN] {} proposal(s) could not be fully fetched:",
            collected.failures.len()
        );
        for failure in &collected.failures {
            println!("  - {}: {}", failure.proposal_id, failure.reason);
        }
        println!("[WARN] Re-run to retry the proposals listed above.");
    }
    if collected.cancelled {
        println!("[WARN] Run was cancelled; results are partial.");
    }

    println!("================================================");
    println!(
        "  Done: {} vote rows, {} delegates, {} proposals",
        matrix.vote_log.len(),
        matrix.delegate_summaries.len(),
        matrix.proposal_summaries.len()
    );
    println!("================================================");

    Ok(())
}

fn dedupe_delegates(raw: Vec<Delegate>) -> Vec<Delegate> {
    let mut seen = HashSet::new();
    raw.into_iter()
        .filter(|d| seen.insert(d.address.clone()))
        .collect()
}

fn print_paths(paths: &report::ReportPaths) {
    for path in paths.all() {
        println!("[REPORT] {}", path.display());
    }
}

fn mask_key(key: &str) -> String {
    if key.len() > 8 {
        format!("{}...{}", &key[..4], &key[key.len() - 4..])
    } else {
        "***".to_string()
    }
}
