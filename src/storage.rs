// ABOUTME: SQLite storage layer for users, roles, ownership links, profiles, and relations
// ABOUTME: Handles all database operations including schema creation and data persistence

use sqlx::{Row, sqlite::{SqlitePool, SqliteRow}};

use crate::error::{AppError, Result};
use crate::types::*;

pub struct Storage {
    pub pool: SqlitePool,
}

impl Storage {
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = SqlitePool::connect(database_url).await?;

        let storage = Self { pool };
        storage.initialize_schema().await?;

        Ok(storage)
    }

    async fn initialize_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                username TEXT UNIQUE NOT NULL,
                email TEXT UNIQUE NOT NULL,
                display_name TEXT NOT NULL,
                password_hash TEXT NOT NULL,
                email_confirmed INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS user_roles (
                user_id TEXT NOT NULL,
                role TEXT NOT NULL,
                PRIMARY KEY (user_id, role),
                FOREIGN KEY (user_id) REFERENCES users (id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Ownership join table: forward list for a user, reverse lookup for a profile.
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS ownerships (
                user_id TEXT NOT NULL,
                profile_id TEXT NOT NULL,
                PRIMARY KEY (user_id, profile_id),
                FOREIGN KEY (user_id) REFERENCES users (id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS profiles (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                gender TEXT NOT NULL,
                birth_date TEXT NOT NULL,
                birth_place TEXT NOT NULL,
                death_date TEXT NOT NULL,
                death_place TEXT NOT NULL,
                biography TEXT NOT NULL,
                created_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS relations (
                id TEXT PRIMARY KEY,
                first_id TEXT NOT NULL,
                second_id TEXT NOT NULL,
                first_to_second TEXT NOT NULL,
                second_to_first TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // Users

    /// Creates a user with a username derived from the email local-part,
    /// suffixing a counter on collision. Fails only on a duplicate email.
    pub async fn create_user(
        &self,
        display_name: &str,
        email: &str,
        password: &str,
        roles: &[String],
        email_confirmed: bool,
    ) -> Result<User> {
        if self.get_user_by_email(email).await?.is_some() {
            return Err(AppError::Validation(format!(
                "email already registered: {}",
                email
            )));
        }

        let base = email.split('@').next().unwrap_or(email);
        let mut username = base.to_string();
        let mut counter = 1;
        while self.username_taken(&username).await? {
            username = format!("{}{}", base, counter);
            counter += 1;
        }

        let user = User {
            id: ObjectId::generate(),
            username,
            email: email.to_string(),
            display_name: display_name.to_string(),
            password_hash: bcrypt::hash(password, bcrypt::DEFAULT_COST)?,
            email_confirmed,
            created_at: chrono::Utc::now().timestamp(),
        };

        sqlx::query(
            r#"
            INSERT INTO users (id, username, email, display_name, password_hash, email_confirmed, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(user.id.as_str())
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.display_name)
        .bind(&user.password_hash)
        .bind(user.email_confirmed)
        .bind(user.created_at)
        .execute(&self.pool)
        .await?;

        for role in roles {
            sqlx::query("INSERT OR IGNORE INTO user_roles (user_id, role) VALUES (?, ?)")
                .bind(user.id.as_str())
                .bind(role)
                .execute(&self.pool)
                .await?;
        }

        Ok(user)
    }

    async fn username_taken(&self, username: &str) -> Result<bool> {
        let row = sqlx::query("SELECT 1 FROM users WHERE username = ?")
            .bind(username)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    pub async fn get_user(&self, id: &ObjectId) -> Result<User> {
        let row = sqlx::query("SELECT * FROM users WHERE id = ?")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("user {}", id)))?;

        user_from_row(&row)
    }

    pub async fn get_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let row = sqlx::query("SELECT * FROM users WHERE email = ?")
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(user_from_row).transpose()
    }

    pub async fn get_user_by_username(&self, username: &str) -> Result<Option<User>> {
        let row = sqlx::query("SELECT * FROM users WHERE username = ?")
            .bind(username)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(user_from_row).transpose()
    }

    pub async fn list_users(&self) -> Result<Vec<User>> {
        let rows = sqlx::query("SELECT * FROM users ORDER BY created_at")
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(user_from_row).collect()
    }

    pub fn verify_password(&self, user: &User, plaintext: &str) -> Result<bool> {
        Ok(bcrypt::verify(plaintext, &user.password_hash)?)
    }

    pub async fn update_user(
        &self,
        id: &ObjectId,
        display_name: Option<&str>,
        email: Option<&str>,
    ) -> Result<()> {
        let user = self.get_user(id).await?;

        if let Some(email) = email {
            if email != user.email && self.get_user_by_email(email).await?.is_some() {
                return Err(AppError::Validation(format!(
                    "email already registered: {}",
                    email
                )));
            }
        }

        sqlx::query("UPDATE users SET display_name = ?, email = ? WHERE id = ?")
            .bind(display_name.unwrap_or(&user.display_name))
            .bind(email.unwrap_or(&user.email))
            .bind(id.as_str())
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    pub async fn set_email_confirmed(&self, id: &ObjectId) -> Result<()> {
        let result = sqlx::query("UPDATE users SET email_confirmed = 1 WHERE id = ?")
            .bind(id.as_str())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("user {}", id)));
        }
        Ok(())
    }

    pub async fn set_password(&self, id: &ObjectId, new_password: &str) -> Result<()> {
        let hash = bcrypt::hash(new_password, bcrypt::DEFAULT_COST)?;
        let result = sqlx::query("UPDATE users SET password_hash = ? WHERE id = ?")
            .bind(hash)
            .bind(id.as_str())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("user {}", id)));
        }
        Ok(())
    }

    /// Removes the user plus their role and ownership rows. Owned profiles are
    /// left in place (see DESIGN.md).
    pub async fn delete_user(&self, id: &ObjectId) -> Result<()> {
        sqlx::query("DELETE FROM user_roles WHERE user_id = ?")
            .bind(id.as_str())
            .execute(&self.pool)
            .await?;
        sqlx::query("DELETE FROM ownerships WHERE user_id = ?")
            .bind(id.as_str())
            .execute(&self.pool)
            .await?;

        let result = sqlx::query("DELETE FROM users WHERE id = ?")
            .bind(id.as_str())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("user {}", id)));
        }
        Ok(())
    }

    pub async fn roles_for(&self, id: &ObjectId) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT role FROM user_roles WHERE user_id = ? ORDER BY role")
            .bind(id.as_str())
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.iter().map(|r| r.get("role")).collect())
    }

    // Ownership

    pub async fn add_ownership(&self, user_id: &ObjectId, profile_id: &ObjectId) -> Result<()> {
        sqlx::query("INSERT OR IGNORE INTO ownerships (user_id, profile_id) VALUES (?, ?)")
            .bind(user_id.as_str())
            .bind(profile_id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn remove_ownership_of_profile(&self, profile_id: &ObjectId) -> Result<()> {
        sqlx::query("DELETE FROM ownerships WHERE profile_id = ?")
            .bind(profile_id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn owned_profile_ids(&self, user_id: &ObjectId) -> Result<Vec<ObjectId>> {
        let rows = sqlx::query("SELECT profile_id FROM ownerships WHERE user_id = ?")
            .bind(user_id.as_str())
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|r| ObjectId::parse(r.get("profile_id")))
            .collect()
    }

    pub async fn is_owner(&self, user_id: &ObjectId, profile_id: &ObjectId) -> Result<bool> {
        let row = sqlx::query("SELECT 1 FROM ownerships WHERE user_id = ? AND profile_id = ?")
            .bind(user_id.as_str())
            .bind(profile_id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    // Profiles

    #[allow(clippy::too_many_arguments)]
    pub async fn create_profile(
        &self,
        name: &str,
        gender: &str,
        birth_date: chrono::NaiveDate,
        birth_place: &str,
        death_date: chrono::NaiveDate,
        death_place: &str,
        biography: &str,
    ) -> Result<Profile> {
        let profile = Profile {
            id: ObjectId::generate(),
            name: name.to_string(),
            gender: gender.to_string(),
            birth_date,
            birth_place: birth_place.to_string(),
            death_date,
            death_place: death_place.to_string(),
            biography: biography.to_string(),
            created_at: chrono::Utc::now().timestamp(),
        };

        sqlx::query(
            r#"
            INSERT INTO profiles (id, name, gender, birth_date, birth_place, death_date, death_place, biography, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(profile.id.as_str())
        .bind(&profile.name)
        .bind(&profile.gender)
        .bind(profile.birth_date.to_string())
        .bind(&profile.birth_place)
        .bind(profile.death_date.to_string())
        .bind(&profile.death_place)
        .bind(&profile.biography)
        .bind(profile.created_at)
        .execute(&self.pool)
        .await?;

        Ok(profile)
    }

    pub async fn get_profile(&self, id: &ObjectId) -> Result<Profile> {
        let row = sqlx::query("SELECT * FROM profiles WHERE id = ?")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("profile {}", id)))?;

        profile_from_row(&row)
    }

    pub async fn list_profiles(&self) -> Result<Vec<Profile>> {
        let rows = sqlx::query("SELECT * FROM profiles ORDER BY created_at")
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(profile_from_row).collect()
    }

    pub async fn profiles_by_ids(&self, ids: &[ObjectId]) -> Result<Vec<Profile>> {
        let mut profiles = Vec::with_capacity(ids.len());
        for id in ids {
            // A dangling ownership row (profile removed out of band) is skipped.
            match self.get_profile(id).await {
                Ok(profile) => profiles.push(profile),
                Err(AppError::NotFound(_)) => continue,
                Err(other) => return Err(other),
            }
        }
        Ok(profiles)
    }

    pub async fn update_profile_field(&self, id: &ObjectId, field: &UpdatableField) -> Result<()> {
        // Column names come from the closed enum, never from the request.
        let sql = format!("UPDATE profiles SET {} = ? WHERE id = ?", field.column());
        let result = sqlx::query(&sql)
            .bind(field.value_text())
            .bind(id.as_str())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("profile {}", id)));
        }
        Ok(())
    }

    pub async fn delete_profile(&self, id: &ObjectId) -> Result<()> {
        let result = sqlx::query("DELETE FROM profiles WHERE id = ?")
            .bind(id.as_str())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("profile {}", id)));
        }
        Ok(())
    }

    /// Case-insensitive substring match on name. A blank term matches nothing
    /// rather than everything.
    pub async fn search_profiles(&self, term: &str) -> Result<Vec<Profile>> {
        let term = term.trim();
        if term.is_empty() {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(
            "SELECT * FROM profiles WHERE name LIKE '%' || ? || '%' COLLATE NOCASE ORDER BY name",
        )
        .bind(term)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(profile_from_row).collect()
    }

    // Relations

    pub async fn create_relation(&self, req: &RelationRequest) -> Result<Relation> {
        let relation = Relation {
            id: ObjectId::generate(),
            first_id: req.first_id.clone(),
            second_id: req.second_id.clone(),
            first_to_second: req.first_to_second.clone(),
            second_to_first: req.second_to_first.clone(),
        };

        sqlx::query(
            r#"
            INSERT INTO relations (id, first_id, second_id, first_to_second, second_to_first)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(relation.id.as_str())
        .bind(relation.first_id.as_str())
        .bind(relation.second_id.as_str())
        .bind(&relation.first_to_second)
        .bind(&relation.second_to_first)
        .execute(&self.pool)
        .await?;

        Ok(relation)
    }

    pub async fn get_relation(&self, id: &ObjectId) -> Result<Relation> {
        let row = sqlx::query("SELECT * FROM relations WHERE id = ?")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("relation {}", id)))?;

        relation_from_row(&row)
    }

    pub async fn update_relation(&self, id: &ObjectId, req: &RelationRequest) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE relations
            SET first_id = ?, second_id = ?, first_to_second = ?, second_to_first = ?
            WHERE id = ?
            "#,
        )
        .bind(req.first_id.as_str())
        .bind(req.second_id.as_str())
        .bind(&req.first_to_second)
        .bind(&req.second_to_first)
        .bind(id.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("relation {}", id)));
        }
        Ok(())
    }

    pub async fn delete_relation(&self, id: &ObjectId) -> Result<()> {
        let result = sqlx::query("DELETE FROM relations WHERE id = ?")
            .bind(id.as_str())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("relation {}", id)));
        }
        Ok(())
    }

    /// Edges where the profile appears as either endpoint.
    pub async fn relations_for(&self, profile_id: &ObjectId) -> Result<Vec<Relation>> {
        let rows = sqlx::query("SELECT * FROM relations WHERE first_id = ? OR second_id = ?")
            .bind(profile_id.as_str())
            .bind(profile_id.as_str())
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(relation_from_row).collect()
    }
}

fn user_from_row(row: &SqliteRow) -> Result<User> {
    Ok(User {
        id: ObjectId::parse(row.get("id"))?,
        username: row.get("username"),
        email: row.get("email"),
        display_name: row.get("display_name"),
        password_hash: row.get("password_hash"),
        email_confirmed: row.get::<i64, _>("email_confirmed") != 0,
        created_at: row.get("created_at"),
    })
}

fn profile_from_row(row: &SqliteRow) -> Result<Profile> {
    Ok(Profile {
        id: ObjectId::parse(row.get("id"))?,
        name: row.get("name"),
        gender: row.get("gender"),
        birth_date: parse_stored_date(row.get("birth_date"))?,
        birth_place: row.get("birth_place"),
        death_date: parse_stored_date(row.get("death_date"))?,
        death_place: row.get("death_place"),
        biography: row.get("biography"),
        created_at: row.get("created_at"),
    })
}

fn relation_from_row(row: &SqliteRow) -> Result<Relation> {
    Ok(Relation {
        id: ObjectId::parse(row.get("id"))?,
        first_id: ObjectId::parse(row.get("first_id"))?,
        second_id: ObjectId::parse(row.get("second_id"))?,
        first_to_second: row.get("first_to_second"),
        second_to_first: row.get("second_to_first"),
    })
}

fn parse_stored_date(raw: String) -> Result<chrono::NaiveDate> {
    chrono::NaiveDate::parse_from_str(&raw, "%Y-%m-%d")
        .map_err(|_| AppError::Storage(format!("corrupt date column: {}", raw)))
}
