//! Execution telemetry and agent performance evaluation.
//!
//! Every engine invocation logs one immutable execution record into a local
//! SQLite database; a per-agent metrics cache is refreshed on each insert so
//! reads stay cheap. Reports roll up per-agent metrics over a window,
//! break results down by task category (keyword dictionary), and emit
//! improvement suggestions when an agent trips the weakness thresholds
//! (category failure rate above 50 %, average duration above 10 s, average
//! rating below 3.5).

use crate::error::{HiveError, HiveResult};
use rusqlite::{params, Connection};
use serde_json::Value;
use std::path::Path;
use std::sync::Mutex;

/// Task categories with their keyword dictionaries.
const CATEGORIES: [(&str, &str); 9] = [
    ("code_writing", "write,create,implement,build,code,function,class"),
    ("code_debugging", "debug,fix,error,bug,issue,problem"),
    ("code_review", "review,check,analyze,examine,audit"),
    ("explanation", "explain,describe,how,what,why"),
    ("research", "research,find,search,lookup,documentation"),
    ("planning", "plan,design,architect,structure"),
    ("testing", "test,verify,validate,check"),
    ("refactoring", "refactor,improve,optimize,clean"),
    ("question", "question,ask,help,confused"),
];

/// Caps applied before a record is stored.
const TASK_CAP: usize = 200;
const RESPONSE_CAP: usize = 500;

fn truncate_chars(text: &str, cap: usize) -> String {
    text.chars().take(cap).collect()
}

/// Classify a task into a category by keyword count; `other` when nothing
/// matches.
pub fn classify_task(task: &str) -> &'static str {
    let lowered = task.to_lowercase();
    let mut best = "other";
    let mut best_score = 0usize;
    for (name, keywords) in CATEGORIES.iter() {
        let score = keywords
            .split(',')
            .filter(|kw| lowered.contains(kw))
            .count();
        if score > best_score {
            best_score = score;
            best = name;
        }
    }
    best
}

/// Append-only telemetry store with a per-agent metrics cache.
pub struct Evaluator {
    conn: Mutex<Connection>,
}

impl Evaluator {
    /// Open (or create) the database at `path`.
    pub fn new(path: &Path) -> HiveResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)
            .map_err(|e| HiveError::internal(format!("cannot open evaluator db: {}", e)))?;
        let evaluator = Self {
            conn: Mutex::new(conn),
        };
        evaluator.init_schema()?;
        Ok(evaluator)
    }

    /// In-memory store for tests.
    pub fn in_memory() -> HiveResult<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| HiveError::internal(format!("cannot open evaluator db: {}", e)))?;
        let evaluator = Self {
            conn: Mutex::new(conn),
        };
        evaluator.init_schema()?;
        Ok(evaluator)
    }

    fn init_schema(&self) -> HiveResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS executions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                agent_type TEXT NOT NULL,
                task TEXT NOT NULL,
                task_category TEXT NOT NULL,
                response TEXT NOT NULL,
                duration_ms INTEGER NOT NULL,
                success INTEGER NOT NULL,
                error TEXT,
                tools_used TEXT NOT NULL,
                user_feedback_rating INTEGER,
                user_feedback_text TEXT,
                session_id TEXT NOT NULL,
                timestamp REAL NOT NULL
            );
            CREATE TABLE IF NOT EXISTS metrics_cache (
                agent_type TEXT PRIMARY KEY,
                total_executions INTEGER NOT NULL,
                successful_executions INTEGER NOT NULL,
                average_duration_ms REAL NOT NULL,
                success_rate REAL NOT NULL,
                average_rating REAL NOT NULL,
                last_updated REAL NOT NULL
            );",
        )
        .map_err(|e| HiveError::internal(format!("schema init failed: {}", e)))?;
        Ok(())
    }

    /// Log one execution record and refresh the agent's cached metrics.
    #[allow(clippy::too_many_arguments)]
    pub fn log_execution(
        &self,
        agent: &str,
        task: &str,
        response: &str,
        duration_ms: u64,
        success: bool,
        error: Option<&str>,
        tools_used: &[String],
        rating: Option<u8>,
        session_id: &str,
    ) -> HiveResult<()> {
        let category = classify_task(task);
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO executions
             (agent_type, task, task_category, response, duration_ms, success, error,
              tools_used, user_feedback_rating, user_feedback_text, session_id, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, NULL, ?10, ?11)",
            params![
                agent,
                truncate_chars(task, TASK_CAP),
                category,
                truncate_chars(response, RESPONSE_CAP),
                duration_ms as i64,
                success as i64,
                error,
                serde_json::to_string(tools_used)?,
                rating.map(|r| r as i64),
                session_id,
                chrono::Utc::now().timestamp_millis() as f64 / 1000.0,
            ],
        )
        .map_err(|e| HiveError::internal(format!("log_execution failed: {}", e)))?;
        drop(conn);

        self.refresh_cache(agent)
    }

    /// Recompute and store the cached metrics for one agent.
    fn refresh_cache(&self, agent: &str) -> HiveResult<()> {
        let conn = self.conn.lock().unwrap();
        let (total, successful, avg_duration, avg_rating): (i64, i64, f64, f64) = conn
            .query_row(
                "SELECT COUNT(*),
                        COALESCE(SUM(success), 0),
                        COALESCE(AVG(duration_ms), 0),
                        COALESCE(AVG(user_feedback_rating), 0)
                 FROM executions WHERE agent_type = ?1",
                params![agent],
                |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                    ))
                },
            )
            .map_err(|e| HiveError::internal(format!("metrics query failed: {}", e)))?;

        let success_rate = if total > 0 {
            successful as f64 / total as f64 * 100.0
        } else {
            0.0
        };

        conn.execute(
            "INSERT OR REPLACE INTO metrics_cache
             (agent_type, total_executions, successful_executions, average_duration_ms,
              success_rate, average_rating, last_updated)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                agent,
                total,
                successful,
                avg_duration,
                success_rate,
                avg_rating,
                chrono::Utc::now().timestamp_millis() as f64 / 1000.0,
            ],
        )
        .map_err(|e| HiveError::internal(format!("cache update failed: {}", e)))?;
        Ok(())
    }

    /// Cached metrics for one agent, plus a fresh per-category breakdown
    /// over the last `days`.
    pub fn agent_metrics(&self, agent: &str, days: u32) -> HiveResult<Value> {
        let since = chrono::Utc::now().timestamp() as f64 - days as f64 * 86400.0;
        let conn = self.conn.lock().unwrap();

        let cached = conn
            .query_row(
                "SELECT total_executions, successful_executions, average_duration_ms,
                        success_rate, average_rating
                 FROM metrics_cache WHERE agent_type = ?1",
                params![agent],
                |row| {
                    Ok(serde_json::json!({
                        "total_executions": row.get::<_, i64>(0)?,
                        "successful_executions": row.get::<_, i64>(1)?,
                        "avg_duration_ms": row.get::<_, f64>(2)?,
                        "success_rate": row.get::<_, f64>(3)?,
                        "avg_user_rating": row.get::<_, f64>(4)?,
                    }))
                },
            )
            .unwrap_or_else(|_| {
                serde_json::json!({
                    "total_executions": 0,
                    "successful_executions": 0,
                    "avg_duration_ms": 0.0,
                    "success_rate": 0.0,
                    "avg_user_rating": 0.0,
                })
            });

        let mut stmt = conn
            .prepare(
                "SELECT task_category,
                        COUNT(*),
                        SUM(CASE WHEN success = 0 THEN 1 ELSE 0 END)
                 FROM executions
                 WHERE agent_type = ?1 AND timestamp >= ?2
                 GROUP BY task_category",
            )
            .map_err(|e| HiveError::internal(format!("category query failed: {}", e)))?;
        let categories: Vec<Value> = stmt
            .query_map(params![agent, since], |row| {
                let total: i64 = row.get(1)?;
                let failures: i64 = row.get(2)?;
                Ok(serde_json::json!({
                    "category": row.get::<_, String>(0)?,
                    "total": total,
                    "failures": failures,
                    "failure_rate": if total > 0 { failures as f64 / total as f64 * 100.0 } else { 0.0 },
                }))
            })
            .map_err(|e| HiveError::internal(format!("category query failed: {}", e)))?
            .filter_map(|r| r.ok())
            .collect();

        let mut result = cached;
        result["agent"] = Value::String(agent.to_string());
        result["days"] = Value::Number(days.into());
        result["categories"] = Value::Array(categories);
        Ok(result)
    }

    /// Recompute an agent's success rate directly from the records.
    /// Used by tests to verify the cache stays honest.
    pub fn recompute_success_rate(&self, agent: &str) -> HiveResult<f64> {
        let conn = self.conn.lock().unwrap();
        let (total, successful): (i64, i64) = conn
            .query_row(
                "SELECT COUNT(*), COALESCE(SUM(success), 0)
                 FROM executions WHERE agent_type = ?1",
                params![agent],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .map_err(|e| HiveError::internal(format!("recompute failed: {}", e)))?;
        Ok(if total > 0 {
            successful as f64 / total as f64 * 100.0
        } else {
            0.0
        })
    }

    /// Weakness-driven improvement suggestions for one agent.
    pub fn improvement_suggestions(&self, agent: &str, days: u32) -> HiveResult<Vec<Value>> {
        let metrics = self.agent_metrics(agent, days)?;
        let mut suggestions = Vec::new();

        if let Some(categories) = metrics["categories"].as_array() {
            for category in categories {
                let failure_rate = category["failure_rate"].as_f64().unwrap_or(0.0);
                let total = category["total"].as_i64().unwrap_or(0);
                if failure_rate > 50.0 && total >= 2 {
                    let name = category["category"].as_str().unwrap_or("other");
                    suggestions.push(serde_json::json!({
                        "priority": "high",
                        "issue": format!("High failure rate ({:.1}%) in {} tasks", failure_rate, name),
                        "suggestions": [
                            format!("Review and improve system prompt for {} tasks", name),
                            format!("Add specialized tools for {} operations", name),
                        ],
                    }));
                }
            }
        }

        let avg_duration = metrics["avg_duration_ms"].as_f64().unwrap_or(0.0);
        if avg_duration > 10_000.0 {
            suggestions.push(serde_json::json!({
                "priority": "medium",
                "issue": format!("Slow average response time ({:.1}s)", avg_duration / 1000.0),
                "suggestions": [
                    "Consider using a faster model for this agent",
                    "Optimize prompts to be more concise",
                ],
            }));
        }

        let avg_rating = metrics["avg_user_rating"].as_f64().unwrap_or(0.0);
        if avg_rating > 0.0 && avg_rating < 3.5 {
            suggestions.push(serde_json::json!({
                "priority": "high",
                "issue": format!("Low user satisfaction rating ({:.1}/5)", avg_rating),
                "suggestions": [
                    "Analyze low-rated responses for common issues",
                    "Improve response formatting and structure",
                ],
            }));
        }

        Ok(suggestions)
    }

    /// Human-readable Markdown summary over the last `days`.
    pub fn summary_report(&self, days: u32) -> HiveResult<String> {
        let since = chrono::Utc::now().timestamp() as f64 - days as f64 * 86400.0;

        // Gather the overall numbers and the agent list in one lock scope;
        // the per-agent reads below re-acquire the lock on their own.
        let (total, successful, session_count, agents) = {
            let conn = self.conn.lock().unwrap();
            let (total, successful, session_count): (i64, i64, i64) = conn
                .query_row(
                    "SELECT COUNT(*), COALESCE(SUM(success), 0), COUNT(DISTINCT session_id)
                     FROM executions WHERE timestamp >= ?1",
                    params![since],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                )
                .map_err(|e| HiveError::internal(format!("report query failed: {}", e)))?;

            let mut stmt = conn
                .prepare(
                    "SELECT DISTINCT agent_type FROM executions WHERE timestamp >= ?1 ORDER BY agent_type",
                )
                .map_err(|e| HiveError::internal(format!("report query failed: {}", e)))?;
            let agents: Vec<String> = stmt
                .query_map(params![since], |row| row.get(0))
                .map_err(|e| HiveError::internal(format!("report query failed: {}", e)))?
                .filter_map(|r| r.ok())
                .collect();
            (total, successful, session_count, agents)
        };

        let success_pct = if total > 0 {
            successful as f64 / total as f64 * 100.0
        } else {
            0.0
        };
        let mut report = format!(
            "# Agent Performance Report: Last {} Days\n\n\
             ## Overall\n\n\
             - Total executions: {}\n\
             - Successful: {} ({:.1}%)\n\
             - Active agents: {}\n\
             - Sessions: {}\n\n\
             ## Per-Agent\n",
            days,
            total,
            successful,
            success_pct,
            agents.len(),
            session_count,
        );

        for agent in &agents {
            let metrics = self.agent_metrics(agent, days)?;
            report.push_str(&format!(
                "\n### {}\n\n- Executions: {}\n- Success rate: {:.1}%\n- Avg duration: {:.2}s\n- Avg rating: {:.1}/5\n",
                agent,
                metrics["total_executions"],
                metrics["success_rate"].as_f64().unwrap_or(0.0),
                metrics["avg_duration_ms"].as_f64().unwrap_or(0.0) / 1000.0,
                metrics["avg_user_rating"].as_f64().unwrap_or(0.0),
            ));

            let suggestions = self.improvement_suggestions(agent, days)?;
            if !suggestions.is_empty() {
                report.push_str("\nNeeds attention:\n");
                for suggestion in suggestions.iter().take(2) {
                    report.push_str(&format!(
                        "- {}\n",
                        suggestion["issue"].as_str().unwrap_or("")
                    ));
                }
            }
        }

        Ok(report)
    }

    /// Attach a user rating to the most recent execution of a session.
    pub fn rate_last_execution(&self, session_id: &str, rating: u8) -> HiveResult<()> {
        if !(1..=5).contains(&rating) {
            return Err(HiveError::validation("rating must be 1-5"));
        }
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE executions SET user_feedback_rating = ?1
             WHERE id = (SELECT MAX(id) FROM executions WHERE session_id = ?2)",
            params![rating as i64, session_id],
        )
        .map_err(|e| HiveError::internal(format!("rating update failed: {}", e)))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn log(
        evaluator: &Evaluator,
        agent: &str,
        task: &str,
        success: bool,
        duration_ms: u64,
    ) {
        evaluator
            .log_execution(
                agent,
                task,
                "response",
                duration_ms,
                success,
                if success { None } else { Some("boom") },
                &[],
                None,
                "s1",
            )
            .unwrap();
    }

    #[test]
    fn category_classification() {
        assert_eq!(classify_task("write a function to parse json"), "code_writing");
        assert_eq!(classify_task("debug this error in the parser"), "code_debugging");
        assert_eq!(classify_task("research the latest documentation"), "research");
        assert_eq!(classify_task("zzz qqq"), "other");
    }

    #[test]
    fn cached_success_rate_matches_recomputation() {
        let evaluator = Evaluator::in_memory().unwrap();
        log(&evaluator, "coder", "write code", true, 1000);
        log(&evaluator, "coder", "write more code", true, 2000);
        log(&evaluator, "coder", "debug a bug", false, 500);

        let metrics = evaluator.agent_metrics("coder", 30).unwrap();
        let cached = metrics["success_rate"].as_f64().unwrap();
        let fresh = evaluator.recompute_success_rate("coder").unwrap();
        assert!((cached - fresh).abs() < 1e-9);
        assert!((cached - 200.0 / 3.0).abs() < 1e-6);
        assert_eq!(metrics["total_executions"], 3);
    }

    #[test]
    fn long_fields_are_capped() {
        let evaluator = Evaluator::in_memory().unwrap();
        let long_task = "explain ".repeat(100);
        evaluator
            .log_execution("general", &long_task, &"r".repeat(2000), 10, true, None, &[], None, "s1")
            .unwrap();
        let conn = evaluator.conn.lock().unwrap();
        let (task, response): (String, String) = conn
            .query_row(
                "SELECT task, response FROM executions LIMIT 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert_eq!(task.chars().count(), 200);
        assert_eq!(response.chars().count(), 500);
    }

    #[test]
    fn failing_category_triggers_suggestion() {
        let evaluator = Evaluator::in_memory().unwrap();
        log(&evaluator, "coder", "debug the bug", false, 100);
        log(&evaluator, "coder", "fix this error", false, 100);
        log(&evaluator, "coder", "debug another issue", false, 100);

        let suggestions = evaluator.improvement_suggestions("coder", 30).unwrap();
        assert!(suggestions
            .iter()
            .any(|s| s["issue"].as_str().unwrap().contains("failure rate")));
    }

    #[test]
    fn slow_agent_triggers_suggestion() {
        let evaluator = Evaluator::in_memory().unwrap();
        log(&evaluator, "researcher", "research topic", true, 15_000);
        let suggestions = evaluator.improvement_suggestions("researcher", 30).unwrap();
        assert!(suggestions
            .iter()
            .any(|s| s["issue"].as_str().unwrap().contains("Slow")));
    }

    #[test]
    fn rating_updates_and_feeds_suggestions() {
        let evaluator = Evaluator::in_memory().unwrap();
        log(&evaluator, "general", "answer a question", true, 100);
        evaluator.rate_last_execution("s1", 2).unwrap();
        // Cache refresh happens on the next log.
        log(&evaluator, "general", "another question", true, 100);

        let metrics = evaluator.agent_metrics("general", 30).unwrap();
        assert!(metrics["avg_user_rating"].as_f64().unwrap() > 0.0);

        assert!(evaluator.rate_last_execution("s1", 9).is_err());
    }

    #[test]
    fn summary_report_mentions_agents() {
        let evaluator = Evaluator::in_memory().unwrap();
        log(&evaluator, "coder", "write code", true, 100);
        log(&evaluator, "executor", "run command", false, 100);

        let report = evaluator.summary_report(7).unwrap();
        assert!(report.contains("coder"));
        assert!(report.contains("executor"));
        assert!(report.contains("Total executions: 2"));
    }
}
