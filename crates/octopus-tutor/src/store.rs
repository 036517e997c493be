//! SQLite persistence for accounts, activity, badges, messages, and the
//! problem of the week.
//!
//! Problems and sessions are never stored here; they live in memory for the
//! duration of a session.

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSqlOutput, ValueRef};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row, ToSql};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::auth::Role;
use crate::error::{Result, TutorError};

const SCHEMA: &str = r"
    PRAGMA foreign_keys = ON;

    CREATE TABLE IF NOT EXISTS users (
      id INTEGER PRIMARY KEY AUTOINCREMENT,
      email TEXT UNIQUE NOT NULL,
      password TEXT NOT NULL,
      name TEXT NOT NULL,
      role TEXT NOT NULL CHECK(role IN ('individual', 'student', 'teacher')),
      teacher_code TEXT UNIQUE,
      teacher_id INTEGER REFERENCES users(id),
      created_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS activity (
      id INTEGER PRIMARY KEY AUTOINCREMENT,
      user_id INTEGER NOT NULL REFERENCES users(id),
      type TEXT NOT NULL,
      problem_text TEXT,
      concept_label TEXT,
      duration_seconds INTEGER NOT NULL DEFAULT 0,
      score INTEGER,
      created_at TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_activity_user ON activity(user_id, id);

    CREATE TABLE IF NOT EXISTS badges (
      id INTEGER PRIMARY KEY AUTOINCREMENT,
      name TEXT NOT NULL UNIQUE,
      description TEXT NOT NULL,
      icon TEXT NOT NULL,
      requirement_type TEXT NOT NULL,
      requirement_count INTEGER NOT NULL
    );

    CREATE TABLE IF NOT EXISTS user_badges (
      user_id INTEGER NOT NULL REFERENCES users(id),
      badge_id INTEGER NOT NULL REFERENCES badges(id),
      earned_at TEXT NOT NULL,
      PRIMARY KEY(user_id, badge_id)
    );

    CREATE TABLE IF NOT EXISTS messages (
      id INTEGER PRIMARY KEY AUTOINCREMENT,
      sender_id INTEGER NOT NULL REFERENCES users(id),
      receiver_id INTEGER NOT NULL REFERENCES users(id),
      content TEXT NOT NULL,
      is_read INTEGER NOT NULL DEFAULT 0,
      created_at TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_messages_pair ON messages(sender_id, receiver_id);

    CREATE TABLE IF NOT EXISTS problem_of_the_week (
      teacher_id INTEGER PRIMARY KEY REFERENCES users(id),
      problem_text TEXT NOT NULL,
      updated_at TEXT NOT NULL
    );
";

/// Badges available in every store: name, description, icon, requirement,
/// count.
const SEED_BADGES: &[(&str, &str, &str, BadgeRequirement, i64)] = &[
    ("First Solve", "Reached the solution of your first problem", "Star", BadgeRequirement::ProblemsSolved, 1),
    ("Problem Crusher", "Solved five problems", "Trophy", BadgeRequirement::ProblemsSolved, 5),
    ("Quick Learner", "Mastered three concepts", "Zap", BadgeRequirement::ConceptsMastered, 3),
    ("Concept Guardian", "Mastered ten concepts", "Shield", BadgeRequirement::ConceptsMastered, 10),
    ("Geometry Sage", "Mastered twenty-five concepts", "Triangle", BadgeRequirement::ConceptsMastered, 25),
];

// ============================================================================
// Record types
// ============================================================================

/// A registered account, without its password hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    /// Row id.
    pub id: i64,
    /// Unique email.
    pub email: String,
    /// Display name.
    pub name: String,
    /// Account role.
    pub role: Role,
    /// Shareable code, teachers only.
    pub teacher_code: Option<String>,
    /// Linked teacher, students only.
    pub teacher_id: Option<i64>,
    /// When the account was created.
    pub created_at: DateTime<Utc>,
}

/// Fields for a new account.
#[derive(Debug, Clone)]
pub struct NewUser<'a> {
    /// Email, unique across accounts.
    pub email: &'a str,
    /// Argon2 PHC hash.
    pub password_hash: &'a str,
    /// Display name.
    pub name: &'a str,
    /// Account role.
    pub role: Role,
    /// Teacher code, for teachers.
    pub teacher_code: Option<&'a str>,
    /// Linked teacher, for students.
    pub teacher_id: Option<i64>,
}

/// What a learner did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    /// Submitted a problem for analysis.
    Analyze,
    /// Opened a concept's teaching session.
    Learn,
    /// Marked a concept as understood.
    Complete,
    /// Reached a problem's solution.
    Solve,
    /// Passed a quiz.
    QuizPass,
    /// Failed a quiz.
    QuizFail,
}

impl ActivityKind {
    /// Database and wire name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Analyze => "analyze",
            Self::Learn => "learn",
            Self::Complete => "complete",
            Self::Solve => "solve",
            Self::QuizPass => "quiz_pass",
            Self::QuizFail => "quiz_fail",
        }
    }
}

impl fmt::Display for ActivityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActivityKind {
    type Err = TutorError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "analyze" => Ok(Self::Analyze),
            "learn" => Ok(Self::Learn),
            "complete" => Ok(Self::Complete),
            "solve" => Ok(Self::Solve),
            "quiz_pass" => Ok(Self::QuizPass),
            "quiz_fail" => Ok(Self::QuizFail),
            other => Err(TutorError::invalid_input(format!("Unknown activity type '{other}'"))),
        }
    }
}

/// An activity to record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewActivity {
    /// What happened.
    #[serde(rename = "type")]
    pub kind: ActivityKind,
    /// The problem involved.
    #[serde(default)]
    pub problem_text: Option<String>,
    /// The concept involved.
    #[serde(default)]
    pub concept_label: Option<String>,
    /// Time spent, in seconds.
    #[serde(default)]
    pub duration_seconds: i64,
    /// Quiz score.
    #[serde(default)]
    pub score: Option<i64>,
}

impl NewActivity {
    /// An activity with no details.
    #[must_use]
    pub const fn new(kind: ActivityKind) -> Self {
        Self {
            kind,
            problem_text: None,
            concept_label: None,
            duration_seconds: 0,
            score: None,
        }
    }

    /// Attaches the problem text.
    #[must_use]
    pub fn with_problem(mut self, problem: impl Into<String>) -> Self {
        self.problem_text = Some(problem.into());
        self
    }

    /// Attaches the concept label.
    #[must_use]
    pub fn with_concept(mut self, label: impl Into<String>) -> Self {
        self.concept_label = Some(label.into());
        self
    }

    /// Attaches a score.
    #[must_use]
    pub const fn with_score(mut self, score: i64) -> Self {
        self.score = Some(score);
        self
    }
}

/// A recorded activity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    /// Row id.
    pub id: i64,
    /// Who did it.
    pub user_id: i64,
    /// What happened.
    #[serde(rename = "type")]
    pub kind: ActivityKind,
    /// The problem involved.
    pub problem_text: Option<String>,
    /// The concept involved.
    pub concept_label: Option<String>,
    /// Time spent, in seconds.
    pub duration_seconds: i64,
    /// Quiz score.
    pub score: Option<i64>,
    /// When it was recorded.
    pub created_at: DateTime<Utc>,
}

/// An activity attributed to a named student, for class views.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassActivity {
    /// Student id.
    pub student_id: i64,
    /// Student name.
    pub name: String,
    /// What happened.
    #[serde(rename = "type")]
    pub kind: ActivityKind,
    /// The concept involved.
    pub concept_label: Option<String>,
    /// The problem involved.
    pub problem_text: Option<String>,
    /// Time spent, in seconds.
    pub duration_seconds: i64,
    /// Quiz score.
    pub score: Option<i64>,
    /// When it was recorded.
    pub created_at: DateTime<Utc>,
}

/// What a badge counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BadgeRequirement {
    /// Number of `solve` activities.
    ProblemsSolved,
    /// Number of `complete` and `quiz_pass` activities.
    ConceptsMastered,
}

impl BadgeRequirement {
    const fn as_str(self) -> &'static str {
        match self {
            Self::ProblemsSolved => "problems_solved",
            Self::ConceptsMastered => "concepts_mastered",
        }
    }
}

/// A badge, with the time it was earned when listed for a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Badge {
    /// Row id.
    pub id: i64,
    /// Badge name.
    pub name: String,
    /// What it rewards.
    pub description: String,
    /// Icon name.
    pub icon: String,
    /// What it counts.
    pub requirement_type: BadgeRequirement,
    /// How many are needed.
    pub requirement_count: i64,
    /// When the user earned it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub earned_at: Option<DateTime<Utc>>,
}

/// A direct message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Row id.
    pub id: i64,
    /// Sender.
    pub sender_id: i64,
    /// Receiver.
    pub receiver_id: i64,
    /// Body text.
    pub content: String,
    /// Whether the receiver has opened the conversation since.
    pub is_read: bool,
    /// When it was sent.
    pub created_at: DateTime<Utc>,
}

/// A teacher's featured problem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProblemOfTheWeek {
    /// Owning teacher.
    pub teacher_id: i64,
    /// The problem.
    pub problem_text: String,
    /// Last change.
    pub updated_at: DateTime<Utc>,
}

// ============================================================================
// SQL conversions
// ============================================================================

fn parse_column<T: FromStr>(value: ValueRef<'_>) -> FromSqlResult<T>
where
    T::Err: fmt::Display,
{
    value
        .as_str()?
        .parse()
        .map_err(|e: T::Err| FromSqlError::Other(e.to_string().into()))
}

impl ToSql for Role {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for Role {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        parse_column(value)
    }
}

impl ToSql for ActivityKind {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for ActivityKind {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        parse_column(value)
    }
}

impl FromSql for BadgeRequirement {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        match value.as_str()? {
            "problems_solved" => Ok(Self::ProblemsSolved),
            "concepts_mastered" => Ok(Self::ConceptsMastered),
            other => Err(FromSqlError::Other(format!("unknown badge requirement '{other}'").into())),
        }
    }
}

const USER_COLUMNS: &str = "id, email, name, role, teacher_code, teacher_id, created_at";
const ACTIVITY_COLUMNS: &str =
    "id, user_id, type, problem_text, concept_label, duration_seconds, score, created_at";
const MESSAGE_COLUMNS: &str = "id, sender_id, receiver_id, content, is_read, created_at";

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        email: row.get(1)?,
        name: row.get(2)?,
        role: row.get(3)?,
        teacher_code: row.get(4)?,
        teacher_id: row.get(5)?,
        created_at: row.get(6)?,
    })
}

fn activity_from_row(row: &Row<'_>) -> rusqlite::Result<Activity> {
    Ok(Activity {
        id: row.get(0)?,
        user_id: row.get(1)?,
        kind: row.get(2)?,
        problem_text: row.get(3)?,
        concept_label: row.get(4)?,
        duration_seconds: row.get(5)?,
        score: row.get(6)?,
        created_at: row.get(7)?,
    })
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<Message> {
    Ok(Message {
        id: row.get(0)?,
        sender_id: row.get(1)?,
        receiver_id: row.get(2)?,
        content: row.get(3)?,
        is_read: row.get(4)?,
        created_at: row.get(5)?,
    })
}

fn badge_from_row(row: &Row<'_>) -> rusqlite::Result<Badge> {
    Ok(Badge {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        icon: row.get(3)?,
        requirement_type: row.get(4)?,
        requirement_count: row.get(5)?,
        earned_at: row.get(6)?,
    })
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation
    )
}

// ============================================================================
// Store
// ============================================================================

/// The SQLite-backed store.
///
/// One connection behind a mutex; every method takes the lock for the
/// duration of its statements.
#[derive(Debug)]
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Opens (creating if needed) the database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        info!(path = %path.display(), "Opened database");
        Self::with_connection(conn)
    }

    /// Opens a private in-memory database.
    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        for (name, description, icon, requirement, count) in SEED_BADGES {
            conn.execute(
                "INSERT OR IGNORE INTO badges (name, description, icon, requirement_type, requirement_count)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![name, description, icon, requirement.as_str(), count],
            )?;
        }
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| TutorError::StoragePoisoned)
    }

    // ------------------------------------------------------------------------
    // Users
    // ------------------------------------------------------------------------

    /// Creates an account.
    ///
    /// # Errors
    ///
    /// Returns [`TutorError::Conflict`] if the email or teacher code is
    /// already taken.
    pub fn create_user(&self, new: &NewUser<'_>) -> Result<User> {
        let conn = self.conn()?;
        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM users WHERE email = ?1)",
            params![new.email],
            |row| row.get(0),
        )?;
        if exists {
            return Err(TutorError::conflict("User already exists"));
        }

        let now = Utc::now();
        conn.execute(
            "INSERT INTO users (email, password, name, role, teacher_code, teacher_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                new.email,
                new.password_hash,
                new.name,
                new.role,
                new.teacher_code,
                new.teacher_id,
                now
            ],
        )
        .map_err(|e| {
            if is_constraint_violation(&e) {
                TutorError::conflict("Teacher code already in use")
            } else {
                e.into()
            }
        })?;

        let id = conn.last_insert_rowid();
        debug!(user_id = id, role = %new.role, "User created");
        Ok(User {
            id,
            email: new.email.to_string(),
            name: new.name.to_string(),
            role: new.role,
            teacher_code: new.teacher_code.map(ToString::to_string),
            teacher_id: new.teacher_id,
            created_at: now,
        })
    }

    /// Looks up an account and its password hash by email.
    pub fn credentials(&self, email: &str) -> Result<Option<(User, String)>> {
        let conn = self.conn()?;
        let found = conn
            .query_row(
                &format!("SELECT {USER_COLUMNS}, password FROM users WHERE email = ?1"),
                params![email],
                |row| Ok((user_from_row(row)?, row.get::<_, String>(7)?)),
            )
            .optional()?;
        Ok(found)
    }

    /// Looks up an account by id.
    pub fn user(&self, id: i64) -> Result<Option<User>> {
        let conn = self.conn()?;
        let found = conn
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
                params![id],
                user_from_row,
            )
            .optional()?;
        Ok(found)
    }

    /// Looks up a teacher by their code.
    pub fn teacher_by_code(&self, code: &str) -> Result<Option<User>> {
        let conn = self.conn()?;
        let found = conn
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE teacher_code = ?1 AND role = 'teacher'"),
                params![code],
                user_from_row,
            )
            .optional()?;
        Ok(found)
    }

    /// Finds a teacher by email.
    pub fn teacher_by_email(&self, email: &str) -> Result<Option<User>> {
        let conn = self.conn()?;
        let found = conn
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE email = ?1 AND role = 'teacher'"),
                params![email],
                user_from_row,
            )
            .optional()?;
        Ok(found)
    }

    /// Students linked to `teacher_id`, oldest first.
    pub fn students_of(&self, teacher_id: i64) -> Result<Vec<User>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE teacher_id = ?1 AND role = 'student' ORDER BY id"
        ))?;
        let students = stmt
            .query_map(params![teacher_id], user_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(students)
    }

    /// A student, only if linked to `teacher_id`.
    pub fn student_of(&self, teacher_id: i64, student_id: i64) -> Result<Option<User>> {
        let conn = self.conn()?;
        let found = conn
            .query_row(
                &format!(
                    "SELECT {USER_COLUMNS} FROM users WHERE id = ?1 AND teacher_id = ?2 AND role = 'student'"
                ),
                params![student_id, teacher_id],
                user_from_row,
            )
            .optional()?;
        Ok(found)
    }

    // ------------------------------------------------------------------------
    // Activity and badges
    // ------------------------------------------------------------------------

    /// Records an activity and awards any badges it newly satisfies.
    ///
    /// Returns the badges awarded by this call.
    pub fn record_activity(&self, user_id: i64, activity: &NewActivity) -> Result<Vec<Badge>> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let now = Utc::now();

        tx.execute(
            "INSERT INTO activity (user_id, type, problem_text, concept_label, duration_seconds, score, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                user_id,
                activity.kind,
                activity.problem_text,
                activity.concept_label,
                activity.duration_seconds,
                activity.score,
                now
            ],
        )?;

        let (solved, mastered): (i64, i64) = tx.query_row(
            "SELECT
               COALESCE(SUM(type = 'solve'), 0),
               COALESCE(SUM(type IN ('complete', 'quiz_pass')), 0)
             FROM activity WHERE user_id = ?1",
            params![user_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        let earned = {
            let mut stmt = tx.prepare(
                "SELECT id, name, description, icon, requirement_type, requirement_count, NULL
                 FROM badges
                 WHERE id NOT IN (SELECT badge_id FROM user_badges WHERE user_id = ?1)
                   AND ((requirement_type = 'problems_solved' AND requirement_count <= ?2)
                     OR (requirement_type = 'concepts_mastered' AND requirement_count <= ?3))
                 ORDER BY id",
            )?;
            let rows = stmt
                .query_map(params![user_id, solved, mastered], badge_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows
        };

        let mut awarded = Vec::with_capacity(earned.len());
        for mut badge in earned {
            tx.execute(
                "INSERT OR IGNORE INTO user_badges (user_id, badge_id, earned_at) VALUES (?1, ?2, ?3)",
                params![user_id, badge.id, now],
            )?;
            badge.earned_at = Some(now);
            info!(user_id, badge = %badge.name, "Badge awarded");
            awarded.push(badge);
        }

        tx.commit()?;
        Ok(awarded)
    }

    /// A user's activity, newest first.
    pub fn activities(&self, user_id: i64, limit: usize) -> Result<Vec<Activity>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {ACTIVITY_COLUMNS} FROM activity WHERE user_id = ?1 ORDER BY id DESC LIMIT ?2"
        ))?;
        let rows = stmt
            .query_map(params![user_id, clamp_limit(limit)], activity_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Recent activity of every student linked to `teacher_id`, newest first.
    pub fn class_activity(&self, teacher_id: i64, limit: usize) -> Result<Vec<ClassActivity>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT u.id, u.name, a.type, a.concept_label, a.problem_text, a.duration_seconds, a.score, a.created_at
             FROM activity a JOIN users u ON u.id = a.user_id
             WHERE u.teacher_id = ?1 AND u.role = 'student'
             ORDER BY a.id DESC LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![teacher_id, clamp_limit(limit)], |row| {
                Ok(ClassActivity {
                    student_id: row.get(0)?,
                    name: row.get(1)?,
                    kind: row.get(2)?,
                    concept_label: row.get(3)?,
                    problem_text: row.get(4)?,
                    duration_seconds: row.get(5)?,
                    score: row.get(6)?,
                    created_at: row.get(7)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Badges the user has earned, in the order earned.
    pub fn badges_for(&self, user_id: i64) -> Result<Vec<Badge>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT b.id, b.name, b.description, b.icon, b.requirement_type, b.requirement_count, ub.earned_at
             FROM user_badges ub JOIN badges b ON b.id = ub.badge_id
             WHERE ub.user_id = ?1
             ORDER BY ub.earned_at, b.id",
        )?;
        let rows = stmt
            .query_map(params![user_id], badge_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    // ------------------------------------------------------------------------
    // Messages
    // ------------------------------------------------------------------------

    /// Sends a message.
    ///
    /// # Errors
    ///
    /// Returns [`TutorError::NotFound`] if the receiver does not exist.
    pub fn send_message(&self, sender_id: i64, receiver_id: i64, content: &str) -> Result<Message> {
        let conn = self.conn()?;
        let receiver_exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM users WHERE id = ?1)",
            params![receiver_id],
            |row| row.get(0),
        )?;
        if !receiver_exists {
            return Err(TutorError::not_found("Recipient not found"));
        }

        let now = Utc::now();
        conn.execute(
            "INSERT INTO messages (sender_id, receiver_id, content, is_read, created_at)
             VALUES (?1, ?2, ?3, 0, ?4)",
            params![sender_id, receiver_id, content, now],
        )?;
        Ok(Message {
            id: conn.last_insert_rowid(),
            sender_id,
            receiver_id,
            content: content.to_string(),
            is_read: false,
            created_at: now,
        })
    }

    /// Messages between two users, oldest first. Messages `user_id` received
    /// from `other_id` are marked read.
    pub fn conversation(&self, user_id: i64, other_id: i64) -> Result<Vec<Message>> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute(
            "UPDATE messages SET is_read = 1 WHERE receiver_id = ?1 AND sender_id = ?2 AND is_read = 0",
            params![user_id, other_id],
        )?;
        let messages = {
            let mut stmt = tx.prepare(&format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages
                 WHERE (sender_id = ?1 AND receiver_id = ?2) OR (sender_id = ?2 AND receiver_id = ?1)
                 ORDER BY id"
            ))?;
            let rows = stmt
                .query_map(params![user_id, other_id], message_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows
        };
        tx.commit()?;
        Ok(messages)
    }

    /// Number of unread messages addressed to `user_id`.
    pub fn unread_count(&self, user_id: i64) -> Result<i64> {
        let conn = self.conn()?;
        let count = conn.query_row(
            "SELECT COUNT(*) FROM messages WHERE receiver_id = ?1 AND is_read = 0",
            params![user_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    // ------------------------------------------------------------------------
    // Problem of the week
    // ------------------------------------------------------------------------

    /// Sets (or replaces) a teacher's problem of the week.
    pub fn set_problem_of_the_week(&self, teacher_id: i64, problem_text: &str) -> Result<ProblemOfTheWeek> {
        let conn = self.conn()?;
        let now = Utc::now();
        conn.execute(
            "INSERT INTO problem_of_the_week (teacher_id, problem_text, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(teacher_id) DO UPDATE SET problem_text = excluded.problem_text, updated_at = excluded.updated_at",
            params![teacher_id, problem_text, now],
        )?;
        Ok(ProblemOfTheWeek {
            teacher_id,
            problem_text: problem_text.to_string(),
            updated_at: now,
        })
    }

    /// A teacher's problem of the week, if set.
    pub fn problem_of_the_week(&self, teacher_id: i64) -> Result<Option<ProblemOfTheWeek>> {
        let conn = self.conn()?;
        let found = conn
            .query_row(
                "SELECT teacher_id, problem_text, updated_at FROM problem_of_the_week WHERE teacher_id = ?1",
                params![teacher_id],
                |row| {
                    Ok(ProblemOfTheWeek {
                        teacher_id: row.get(0)?,
                        problem_text: row.get(1)?,
                        updated_at: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(found)
    }
}

fn clamp_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}
