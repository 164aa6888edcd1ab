//! Trac to GitHub migration: milestones, labels, tickets, then comments.
//!
//! Each phase is best-effort. A failed item is logged and recorded in the
//! report and the run moves on. Mappings produced by a phase are written to
//! the JSON caches as soon as the phase finishes so an interrupted run can
//! resume without recreating what already exists.

use anyhow::Result;
use chrono::SecondsFormat;
use serde::Serialize;
use tracing::{info, warn};

use crate::cache::{LabelMap, MilestoneMap, TicketMap, load_mapping, save_mapping};
use crate::config::MigrationConfig;
use crate::github::{IssueState, IssueTrackerApi, IssueUpdate, NewIssue, NewLabel, NewMilestone};
use crate::markup::{WikiConverter, convert_markup};
use crate::trac::{LabelKind, Paging, TracComment, TracDatabase, TracTicket};

const EMPTY_BODY: &str = "None";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationOptions {
    pub skip_milestones: bool,
    pub skip_labels: bool,
    pub skip_tickets: bool,
    pub skip_comments: bool,
    pub tickets: Paging,
    pub comments: Paging,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PhaseReport {
    pub created: usize,
    pub skipped: usize,
    pub failed: usize,
    pub from_cache: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    pub milestones: PhaseReport,
    pub labels: PhaseReport,
    pub tickets: PhaseReport,
    pub closed_tickets: usize,
    pub comments: PhaseReport,
    pub errors: Vec<String>,
    pub request_count: usize,
}

struct Migration<'a, A: IssueTrackerApi> {
    config: &'a MigrationConfig,
    db: &'a TracDatabase,
    api: &'a mut A,
    converter: WikiConverter,
    report: MigrationReport,
}

pub fn run_migration<A: IssueTrackerApi>(
    config: &MigrationConfig,
    db: &TracDatabase,
    api: &mut A,
    options: &MigrationOptions,
) -> Result<MigrationReport> {
    let mut migration = Migration {
        config,
        db,
        api,
        converter: config.converter(),
        report: MigrationReport::default(),
    };

    let milestones = migration.milestones(options.skip_milestones)?;
    let labels = migration.labels(options.skip_labels)?;
    let tickets = migration.tickets(options, &milestones, &labels)?;
    if options.skip_comments {
        info!("skipping comments");
    } else {
        migration.comments(options.comments, &tickets)?;
    }

    migration.report.request_count = migration.api.request_count();
    info!(
        requests = migration.report.request_count,
        errors = migration.report.errors.len(),
        "migration finished"
    );
    Ok(migration.report)
}

impl<A: IssueTrackerApi> Migration<'_, A> {
    fn convert(&self, text: &str) -> String {
        if text.trim().is_empty() {
            return EMPTY_BODY.to_string();
        }
        convert_markup(self.config.markup.dialect, &self.converter, text)
    }

    fn record_failure(&mut self, item: String, error: anyhow::Error) {
        warn!(%item, error = %format!("{error:#}"), "migration step failed");
        self.report.errors.push(format!("{item}: {error:#}"));
    }

    fn milestones(&mut self, skip: bool) -> Result<MilestoneMap> {
        let config = self.config;
        let cache_path = &config.cache.milestones;
        if let Some(cached) = load_mapping::<MilestoneMap>(cache_path)? {
            info!(count = cached.len(), "using cached milestones");
            self.report.milestones.from_cache = true;
            return Ok(cached);
        }
        if skip {
            info!("skipping milestones");
            return Ok(MilestoneMap::new());
        }

        info!("migrating milestones");
        let mut mapping = MilestoneMap::new();
        for milestone in self.db.milestones()? {
            let payload = NewMilestone {
                title: milestone.name.clone(),
                state: if milestone.is_completed() {
                    IssueState::Closed
                } else {
                    IssueState::Open
                },
                description: self.convert(&milestone.description),
                due_on: milestone
                    .due_at()
                    .map(|due| due.to_rfc3339_opts(SecondsFormat::Secs, true)),
            };
            match self.api.create_milestone(&payload) {
                Ok(number) => {
                    info!(milestone = %milestone.name, number, "created milestone");
                    mapping.insert(milestone.name, number);
                    self.report.milestones.created += 1;
                }
                Err(error) => {
                    self.report.milestones.failed += 1;
                    self.record_failure(format!("milestone {}", milestone.name), error);
                }
            }
        }
        save_mapping(cache_path, &mapping)?;
        Ok(mapping)
    }

    fn labels(&mut self, skip: bool) -> Result<LabelMap> {
        let config = self.config;
        let cache_path = &config.cache.labels;
        if let Some(cached) = load_mapping::<LabelMap>(cache_path)? {
            info!("using cached labels");
            self.report.labels.from_cache = true;
            return Ok(cached);
        }
        if skip {
            info!("skipping labels");
            return Ok(LabelMap::new());
        }

        info!("migrating labels");
        let mut mapping = LabelMap::new();
        for value in self.db.label_values()? {
            let Some(policy) = config
                .label_policy(value.kind, &value.name)
                .filter(|policy| policy.import)
            else {
                self.report.labels.skipped += 1;
                continue;
            };
            let payload = NewLabel {
                name: value.name.clone(),
                color: policy.color.trim_start_matches('#').to_string(),
            };
            match self.api.create_label(&payload) {
                Ok(name) => {
                    info!(kind = %value.kind, label = %name, "created label");
                    mapping.entry(value.kind).or_default().insert(value.name, name);
                    self.report.labels.created += 1;
                }
                Err(error) => {
                    self.report.labels.failed += 1;
                    self.record_failure(format!("{} label {}", value.kind, value.name), error);
                }
            }
        }
        save_mapping(cache_path, &mapping)?;
        Ok(mapping)
    }

    fn tickets(
        &mut self,
        options: &MigrationOptions,
        milestones: &MilestoneMap,
        labels: &LabelMap,
    ) -> Result<TicketMap> {
        let config = self.config;
        let cache_path = &config.cache.tickets;
        let mut mapping = load_mapping::<TicketMap>(cache_path)?.unwrap_or_default();
        self.report.tickets.from_cache = !mapping.is_empty();
        if options.skip_tickets {
            info!("skipping tickets");
            return Ok(mapping);
        }

        info!(offset = options.tickets.offset, limit = ?options.tickets.limit, "migrating tickets");
        for ticket in self.db.tickets(options.tickets)? {
            if mapping.contains_key(&ticket.id) {
                self.report.tickets.skipped += 1;
                continue;
            }
            if ticket.milestone.trim().is_empty() {
                info!(ticket = ticket.id, "ticket has no milestone, skipping");
                self.report.tickets.skipped += 1;
                continue;
            }
            let Some(&milestone) = milestones.get(&ticket.milestone) else {
                warn!(ticket = ticket.id, milestone = %ticket.milestone, "milestone was not migrated, skipping ticket");
                self.report.tickets.skipped += 1;
                continue;
            };

            let payload = NewIssue {
                title: ticket.summary.clone(),
                body: self.convert(&ticket.description),
                assignee: config.assignee_for(&ticket.owner),
                milestone: Some(milestone),
                labels: ticket_labels(&ticket, labels),
            };
            let number = match self.api.create_issue(&payload) {
                Ok(number) => number,
                Err(error) => {
                    self.report.tickets.failed += 1;
                    self.record_failure(format!("ticket #{}", ticket.id), error);
                    continue;
                }
            };
            info!(ticket = ticket.id, issue = number, "created issue");
            mapping.insert(ticket.id, number);
            self.report.tickets.created += 1;

            if ticket.is_closed() {
                let update = IssueUpdate {
                    state: IssueState::Closed,
                };
                match self.api.update_issue(number, &update) {
                    Ok(()) => self.report.closed_tickets += 1,
                    Err(error) => {
                        self.record_failure(format!("closing issue #{number}"), error);
                    }
                }
            }
        }
        save_mapping(cache_path, &mapping)?;
        Ok(mapping)
    }

    fn comments(&mut self, paging: Paging, tickets: &TicketMap) -> Result<()> {
        info!(offset = paging.offset, limit = ?paging.limit, "migrating comments");
        let username = self.config.github_username();
        for comment in self.db.comments(paging)? {
            let Some(&issue) = tickets.get(&comment.ticket) else {
                self.report.comments.skipped += 1;
                continue;
            };
            let body = comment_body(&comment, username.as_deref(), &self.convert(&comment.body));
            match self.api.create_comment(issue, &body) {
                Ok(_) => self.report.comments.created += 1,
                Err(error) => {
                    self.report.comments.failed += 1;
                    self.record_failure(
                        format!("comment on ticket #{} at {}", comment.ticket, comment.time),
                        error,
                    );
                }
            }
        }
        Ok(())
    }
}

fn ticket_labels(ticket: &TracTicket, labels: &LabelMap) -> Vec<String> {
    LabelKind::ALL
        .into_iter()
        .filter_map(|kind| {
            let value = ticket.label_value(kind)?;
            labels.get(&kind)?.get(&value).cloned()
        })
        .collect()
}

/// Comments by anyone other than the migrating account get an author line.
fn comment_body(comment: &TracComment, username: Option<&str>, converted: &str) -> String {
    let own_comment =
        username.is_some_and(|username| username.eq_ignore_ascii_case(comment.author.trim()));
    if own_comment {
        converted.to_string()
    } else {
        format!("**Author: {}**\n{converted}", comment.author)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::path::Path;

    use anyhow::bail;
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    use super::{MigrationOptions, comment_body, run_migration};
    use crate::config::{LabelPolicy, MigrationConfig};
    use crate::github::{IssueState, IssueTrackerApi, IssueUpdate, NewIssue, NewLabel, NewMilestone};
    use crate::trac::tests::seed_trac_db;
    use crate::trac::{Paging, TracComment, TracDatabase};

    #[derive(Default)]
    struct MockApi {
        milestones: Vec<NewMilestone>,
        labels: Vec<NewLabel>,
        issues: Vec<NewIssue>,
        updates: Vec<(u64, IssueUpdate)>,
        comments: Vec<(u64, String)>,
        failing_titles: BTreeSet<String>,
        request_count: usize,
    }

    impl IssueTrackerApi for MockApi {
        fn create_milestone(&mut self, milestone: &NewMilestone) -> anyhow::Result<u64> {
            self.request_count += 1;
            self.milestones.push(milestone.clone());
            Ok(self.milestones.len() as u64)
        }

        fn create_label(&mut self, label: &NewLabel) -> anyhow::Result<String> {
            self.request_count += 1;
            self.labels.push(label.clone());
            Ok(label.name.clone())
        }

        fn create_issue(&mut self, issue: &NewIssue) -> anyhow::Result<u64> {
            self.request_count += 1;
            if self.failing_titles.contains(&issue.title) {
                bail!("HTTP 422: Validation Failed");
            }
            self.issues.push(issue.clone());
            Ok(self.issues.len() as u64)
        }

        fn update_issue(&mut self, number: u64, update: &IssueUpdate) -> anyhow::Result<()> {
            self.request_count += 1;
            self.updates.push((number, update.clone()));
            Ok(())
        }

        fn create_comment(&mut self, issue_number: u64, body: &str) -> anyhow::Result<u64> {
            self.request_count += 1;
            self.comments.push((issue_number, body.to_string()));
            Ok(self.comments.len() as u64)
        }

        fn request_count(&self) -> usize {
            self.request_count
        }
    }

    fn test_config(root: &Path) -> MigrationConfig {
        let mut config = MigrationConfig::default();
        config.cache.milestones = root.join("milestones.json");
        config.cache.labels = root.join("labels.json");
        config.cache.tickets = root.join("tickets.json");
        config.github.project = Some("acme".to_string());
        config.github.repo = Some("widgets".to_string());
        config.github.username = Some("OctoCat".to_string());
        config.markup.wiki_base_uri = Some("https://github.com/acme/widgets".to_string());
        config.trac.database = Some(root.join("trac.db"));
        config.trac.default_owner = Some("maintainer".to_string());
        config
            .trac
            .users
            .insert("alice".to_string(), "alice-gh".to_string());
        config.trac.types.insert(
            "defect".to_string(),
            LabelPolicy {
                import: true,
                ..LabelPolicy::default()
            },
        );
        config.trac.priorities.insert(
            "blocker".to_string(),
            LabelPolicy {
                import: true,
                color: "#ff0000".to_string(),
            },
        );
        config
            .trac
            .components
            .insert("ui".to_string(), LabelPolicy::default());
        config
    }

    fn open_seeded(root: &Path) -> TracDatabase {
        let db_path = root.join("trac.db");
        seed_trac_db(&db_path);
        TracDatabase::open(&db_path).expect("open trac db")
    }

    #[test]
    fn full_migration_creates_everything_in_order() {
        let temp = tempdir().expect("tempdir");
        let config = test_config(temp.path());
        let db = open_seeded(temp.path());
        let mut api = MockApi::default();

        let report =
            run_migration(&config, &db, &mut api, &MigrationOptions::default()).expect("migrate");

        assert_eq!(api.milestones.len(), 2);
        assert_eq!(api.milestones[0].title, "2.0");
        assert_eq!(api.milestones[0].state, IssueState::Open);
        assert_eq!(api.milestones[0].description, "None");
        assert_eq!(api.milestones[0].due_on, None);
        assert_eq!(api.milestones[1].state, IssueState::Closed);
        assert_eq!(api.milestones[1].description, "First *stable* release");
        assert_eq!(
            api.milestones[1].due_on.as_deref(),
            Some("2013-01-01T00:26:40Z")
        );

        let label_names: Vec<(&str, &str)> = api
            .labels
            .iter()
            .map(|label| (label.name.as_str(), label.color.as_str()))
            .collect();
        assert_eq!(label_names, vec![("defect", "ffffff"), ("blocker", "ff0000")]);
        assert_eq!(report.labels.created, 2);
        assert_eq!(report.labels.skipped, 6);

        assert_eq!(api.issues.len(), 2);
        let crash = &api.issues[0];
        assert_eq!(crash.title, "Crash on start");
        assert_eq!(
            crash.body,
            "See [Foo Bar](https://github.com/acme/widgets/wiki/FooBar)"
        );
        assert_eq!(crash.assignee.as_deref(), Some("alice-gh"));
        assert_eq!(crash.milestone, Some(2));
        assert_eq!(crash.labels, vec!["defect".to_string(), "blocker".to_string()]);
        let dark_mode = &api.issues[1];
        assert_eq!(dark_mode.body, "None");
        assert_eq!(dark_mode.assignee.as_deref(), Some("maintainer"));
        assert_eq!(dark_mode.milestone, Some(1));
        assert!(dark_mode.labels.is_empty());

        assert_eq!(
            api.updates,
            vec![(
                1,
                IssueUpdate {
                    state: IssueState::Closed
                }
            )]
        );
        assert_eq!(report.tickets.created, 2);
        assert_eq!(report.tickets.skipped, 1);
        assert_eq!(report.closed_tickets, 1);

        assert_eq!(
            api.comments,
            vec![
                (1, "**Author: alice**\n**Confirmed** on trunk".to_string()),
                (1, "Fixed in SVN commit r42".to_string()),
            ]
        );
        assert_eq!(report.comments.skipped, 1);
        assert!(report.errors.is_empty());
        assert_eq!(report.request_count, api.request_count);

        assert!(config.cache.milestones.exists());
        assert!(config.cache.labels.exists());
        assert!(config.cache.tickets.exists());
    }

    #[test]
    fn rerun_reuses_caches_and_skips_migrated_tickets() {
        let temp = tempdir().expect("tempdir");
        let config = test_config(temp.path());
        let db = open_seeded(temp.path());
        let mut first = MockApi::default();
        run_migration(&config, &db, &mut first, &MigrationOptions::default()).expect("first run");

        let mut second = MockApi::default();
        let options = MigrationOptions {
            skip_comments: true,
            ..MigrationOptions::default()
        };
        let report = run_migration(&config, &db, &mut second, &options).expect("second run");

        assert!(report.milestones.from_cache);
        assert!(report.labels.from_cache);
        assert!(report.tickets.from_cache);
        assert_eq!(report.tickets.created, 0);
        assert_eq!(report.tickets.skipped, 3);
        assert_eq!(second.request_count, 0);
    }

    #[test]
    fn failed_ticket_is_reported_and_its_comments_skipped() {
        let temp = tempdir().expect("tempdir");
        let config = test_config(temp.path());
        let db = open_seeded(temp.path());
        let mut api = MockApi {
            failing_titles: BTreeSet::from(["Crash on start".to_string()]),
            ..MockApi::default()
        };

        let report =
            run_migration(&config, &db, &mut api, &MigrationOptions::default()).expect("migrate");

        assert_eq!(report.tickets.failed, 1);
        assert_eq!(report.tickets.created, 1);
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].starts_with("ticket #1:"));
        assert!(report.errors[0].contains("Validation Failed"));
        assert!(api.updates.is_empty());
        assert!(api.comments.is_empty());
        assert_eq!(report.comments.skipped, 3);
    }

    #[test]
    fn skipped_phases_touch_nothing() {
        let temp = tempdir().expect("tempdir");
        let config = test_config(temp.path());
        let db = open_seeded(temp.path());
        let mut api = MockApi::default();
        let options = MigrationOptions {
            skip_milestones: true,
            skip_labels: true,
            skip_tickets: true,
            skip_comments: true,
            ..MigrationOptions::default()
        };

        let report = run_migration(&config, &db, &mut api, &options).expect("migrate");
        assert_eq!(report.request_count, 0);
        assert!(!config.cache.milestones.exists());
        assert!(!config.cache.tickets.exists());
    }

    #[test]
    fn ticket_paging_limits_created_issues() {
        let temp = tempdir().expect("tempdir");
        let config = test_config(temp.path());
        let db = open_seeded(temp.path());
        let mut api = MockApi::default();
        let options = MigrationOptions {
            skip_comments: true,
            tickets: Paging {
                offset: 1,
                limit: Some(1),
            },
            ..MigrationOptions::default()
        };

        let report = run_migration(&config, &db, &mut api, &options).expect("migrate");
        assert_eq!(report.tickets.created, 1);
        assert_eq!(api.issues[0].title, "Add dark mode");
    }

    #[test]
    fn own_comments_have_no_author_line() {
        let comment = TracComment {
            ticket: 1,
            time: 1,
            author: "octocat".to_string(),
            body: String::new(),
        };
        assert_eq!(comment_body(&comment, Some("OctoCat"), "text"), "text");
        assert_eq!(
            comment_body(&comment, None, "text"),
            "**Author: octocat**\ntext"
        );
    }
}
