//! One invocation of the bot: at most one article goes out per run.
//!
//! The run walks a fixed sequence of states. Text is generated before
//! anything is published, and the ledger is only written after the network
//! confirmed the post. Any failure aborts the run in the state it was in,
//! with no ledger write, so the same article is picked up again next time.

use linkpost_util_error::FmtCompact as _;
use snafu::{ResultExt as _, Snafu};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::eligibility::select_eligible;
use crate::generator::{GenerationError, PostGenerator, PostRequest, validate_post_text};
use crate::ledger::{Ledger, LedgerError};
use crate::publisher::{PublishError, Publisher};
use crate::source::{ArticleSource, SourceError};
use crate::tables::PublishedRecord;

const LOG_TARGET: &str = "linkpost::run";

/// How many earlier posts are shown to the generator
pub const PREVIOUS_POSTS_LIMIT: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Start,
    LedgerReady,
    Fetched,
    Filtered,
    NoWork,
    Selected,
    TextGenerated,
    Published,
    Recorded,
    Done,
}

impl RunState {
    pub fn can_advance_to(self, next: RunState) -> bool {
        use RunState::*;
        matches!(
            (self, next),
            (Start, LedgerReady)
                | (LedgerReady, Fetched)
                | (Fetched, Filtered)
                | (Filtered, NoWork)
                | (Filtered, Selected)
                | (Selected, TextGenerated)
                | (TextGenerated, Published)
                // dry run
                | (TextGenerated, Done)
                | (Published, Recorded)
                | (Recorded, Done)
        )
    }
}

#[derive(Debug, Snafu)]
pub enum RunError {
    #[snafu(display("Ledger unavailable during {state:?}"))]
    Ledger {
        state: RunState,
        source: LedgerError,
    },
    #[snafu(display("Article source unavailable"))]
    Source {
        state: RunState,
        source: SourceError,
    },
    #[snafu(display("Post generation failed, nothing was published"))]
    Generation {
        state: RunState,
        source: GenerationError,
    },
    #[snafu(display("Publishing failed, nothing was recorded"))]
    Publish {
        state: RunState,
        source: PublishError,
    },
    #[snafu(display("Post {post_id} for {url} was published but could not be recorded"))]
    Record {
        state: RunState,
        url: String,
        post_id: String,
        source: LedgerError,
    },
}

pub type RunResult<T> = std::result::Result<T, RunError>;

impl RunError {
    /// State the run was in when it aborted
    pub fn state(&self) -> RunState {
        match self {
            RunError::Ledger { state, .. }
            | RunError::Source { state, .. }
            | RunError::Generation { state, .. }
            | RunError::Publish { state, .. }
            | RunError::Record { state, .. } => *state,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// No eligible article this time
    NoWork,
    /// Post text was generated but, as requested, not published
    DryRun { url: String, text: String },
    Published { record: PublishedRecord },
}

struct StateTracker {
    state: RunState,
}

impl StateTracker {
    fn new() -> Self {
        Self {
            state: RunState::Start,
        }
    }

    fn advance(&mut self, next: RunState) {
        debug_assert!(
            self.state.can_advance_to(next),
            "illegal run transition {:?} -> {next:?}",
            self.state
        );
        debug!(target: LOG_TARGET, from = ?self.state, to = ?next, "Run state");
        self.state = next;
    }
}

/// Execute one run against the given collaborators.
pub async fn run_once(
    config: &Config,
    ledger: &Ledger,
    source: &(dyn ArticleSource + Send + Sync),
    generator: &(dyn PostGenerator + Send + Sync),
    publisher: &(dyn Publisher + Send + Sync),
) -> RunResult<RunOutcome> {
    let mut run = StateTracker::new();

    ledger.init().await.context(LedgerSnafu { state: run.state })?;
    run.advance(RunState::LedgerReady);

    let known_urls = ledger
        .known_urls()
        .await
        .context(LedgerSnafu { state: run.state })?;
    info!(target: LOG_TARGET, count = known_urls.len(), "Already published articles");

    let candidates = source
        .fetch_articles()
        .await
        .context(SourceSnafu { state: run.state })?;
    run.advance(RunState::Fetched);

    let fetched = candidates.len();
    let eligible = select_eligible(candidates, &known_urls, config.min_publish_date);
    run.advance(RunState::Filtered);
    info!(
        target: LOG_TARGET,
        fetched,
        eligible = eligible.len(),
        cutoff = %config.min_publish_date,
        "Filtered articles"
    );

    // Source order is trusted to be newest first
    let Some(article) = eligible.into_iter().next() else {
        run.advance(RunState::NoWork);
        info!(target: LOG_TARGET, "No new articles to publish");
        return Ok(RunOutcome::NoWork);
    };
    run.advance(RunState::Selected);
    info!(target: LOG_TARGET, title = %article.title, url = %article.link, "Selected article");

    let previous_posts = ledger
        .recent_post_texts(PREVIOUS_POSTS_LIMIT)
        .await
        .context(LedgerSnafu { state: run.state })?;

    let text = generator
        .generate(&PostRequest {
            title: &article.title,
            description: &article.description,
            body: &article.body,
            previous_posts: &previous_posts,
        })
        .await
        .and_then(|text| validate_post_text(&text))
        .inspect_err(|err| {
            error!(
                target: LOG_TARGET,
                err = %err.fmt_compact(),
                "Post generation failed, aborting to avoid publishing invalid content"
            );
        })
        .context(GenerationSnafu { state: run.state })?;
    run.advance(RunState::TextGenerated);
    info!(
        target: LOG_TARGET,
        chars = text.chars().count(),
        text = %text,
        "Generated post text"
    );

    if config.dry_run {
        run.advance(RunState::Done);
        info!(target: LOG_TARGET, url = %article.link, "Dry run, not publishing");
        return Ok(RunOutcome::DryRun {
            url: article.link,
            text,
        });
    }

    let user_id = publisher
        .resolve_identity(&config.access_token)
        .await
        .context(PublishSnafu { state: run.state })?;
    let post_id = publisher
        .publish(&config.access_token, &user_id, &text, &article.link)
        .await
        .context(PublishSnafu { state: run.state })?;
    run.advance(RunState::Published);
    info!(target: LOG_TARGET, post_id = %post_id, url = %article.link, "Posted successfully");

    // The post is out; failing to back up must not keep it from being
    // recorded.
    if let Err(err) = ledger.backup().await {
        warn!(target: LOG_TARGET, err = %err.fmt_compact(), "Ledger backup failed");
    }

    let title = Some(article.title.as_str()).filter(|t| !t.is_empty());
    let record = ledger
        .record(&article.link, title, &post_id, Some(&text))
        .await
        .inspect_err(|err| {
            error!(
                target: LOG_TARGET,
                err = %err.fmt_compact(),
                url = %article.link,
                post_id = %post_id,
                "Published post is missing from the ledger, it will be posted again unless recorded"
            );
        })
        .context(RecordSnafu {
            state: run.state,
            url: article.link.as_str(),
            post_id: post_id.as_str(),
        })?;
    run.advance(RunState::Recorded);

    run.advance(RunState::Done);
    Ok(RunOutcome::Published { record })
}

#[cfg(test)]
mod tests {
    use linkpost_util_error::FmtCompact as _;

    use super::*;

    #[test]
    fn happy_path_transitions_are_legal() {
        let path = [
            RunState::Start,
            RunState::LedgerReady,
            RunState::Fetched,
            RunState::Filtered,
            RunState::Selected,
            RunState::TextGenerated,
            RunState::Published,
            RunState::Recorded,
            RunState::Done,
        ];
        for pair in path.windows(2) {
            assert!(pair[0].can_advance_to(pair[1]), "{:?} -> {:?}", pair[0], pair[1]);
        }
        assert!(RunState::Filtered.can_advance_to(RunState::NoWork));
    }

    #[test]
    fn error_report_names_cause_once() {
        let err = RunError::Generation {
            state: RunState::Selected,
            source: GenerationError::TooShort { len: 10 },
        };

        assert_eq!(
            err.fmt_compact().to_string(),
            "Post generation failed, nothing was published: \
             Generated post is too short (10 characters)"
        );
        assert_eq!(err.state(), RunState::Selected);
    }

    #[test]
    fn publishing_requires_generated_text() {
        assert!(!RunState::Selected.can_advance_to(RunState::Published));
        assert!(!RunState::Filtered.can_advance_to(RunState::Published));
        assert!(!RunState::TextGenerated.can_advance_to(RunState::Recorded));
        assert!(!RunState::NoWork.can_advance_to(RunState::Selected));
        assert!(!RunState::Done.can_advance_to(RunState::Start));
    }
}
