use chrono::Utc;
use sqlx::SqlitePool;

use tbtrack_core::sync::{MemberInfo, MemberRole, MemberStatus, TeamInfo, DEFAULT_TEAM};
use tbtrack_core::StoreError;

use super::patient_store::store_err;

/// Team directory: which devices may read a team's records.
#[derive(Debug, Clone)]
pub struct TeamRepository {
    pool: SqlitePool,
}

#[derive(sqlx::FromRow)]
struct TeamRow {
    slug: String,
    name: String,
    is_public: bool,
}

#[derive(sqlx::FromRow)]
struct MemberRow {
    team_slug: String,
    device_id: String,
    user_name: String,
    status: String,
    role: String,
}

impl From<TeamRow> for TeamInfo {
    fn from(row: TeamRow) -> Self {
        TeamInfo {
            slug: row.slug,
            name: row.name,
            is_public: row.is_public,
        }
    }
}

impl From<MemberRow> for MemberInfo {
    fn from(row: MemberRow) -> Self {
        MemberInfo {
            team_slug: row.team_slug,
            device_id: row.device_id,
            user_name: row.user_name,
            status: row.status.parse().unwrap_or_default(),
            role: row.role.parse().unwrap_or_default(),
        }
    }
}

impl TeamRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Whether `device` may read and write `team`.
    ///
    /// The default team and public teams are open; otherwise the device
    /// needs an APPROVED membership.
    pub async fn is_authorized(&self, team: &str, device: &str) -> Result<bool, StoreError> {
        if team == DEFAULT_TEAM {
            return Ok(true);
        }

        let team_row: Option<TeamRow> =
            sqlx::query_as("SELECT slug, name, is_public FROM teams WHERE slug = ?")
                .bind(team)
                .fetch_optional(&self.pool)
                .await
                .map_err(store_err)?;
        if team_row.is_some_and(|t| t.is_public) {
            return Ok(true);
        }

        let status: Option<(String,)> = sqlx::query_as(
            "SELECT status FROM team_members WHERE team_slug = ? AND device_id = ?",
        )
        .bind(team)
        .bind(device)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?;

        Ok(status.is_some_and(|(s,)| s.parse::<MemberStatus>() == Ok(MemberStatus::Approved)))
    }

    /// Records teams and memberships carried by a push.
    ///
    /// Unknown teams are added as given. Unknown memberships are added as
    /// PENDING members whatever status or role the device claims; existing
    /// ones are never changed.
    pub async fn record_push(
        &self,
        teams: &[TeamInfo],
        members: &[MemberInfo],
    ) -> Result<(), StoreError> {
        if teams.is_empty() && members.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await.map_err(store_err)?;
        let now = Utc::now().to_rfc3339();

        for team in teams {
            sqlx::query(
                "INSERT OR IGNORE INTO teams (slug, name, is_public, created_at) VALUES (?, ?, ?, ?)",
            )
            .bind(&team.slug)
            .bind(&team.name)
            .bind(team.is_public)
            .bind(&now)
            .execute(&mut *tx)
            .await
            .map_err(store_err)?;
        }

        for member in members {
            sqlx::query(
                r#"
                INSERT OR IGNORE INTO team_members (team_slug, device_id, user_name, status, role, created_at)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&member.team_slug)
            .bind(&member.device_id)
            .bind(&member.user_name)
            .bind(MemberStatus::Pending.to_string())
            .bind(MemberRole::Member.to_string())
            .bind(&now)
            .execute(&mut *tx)
            .await
            .map_err(store_err)?;
        }

        tx.commit().await.map_err(store_err)?;
        tracing::debug!(
            "recorded {} teams and {} members from push",
            teams.len(),
            members.len()
        );
        Ok(())
    }

    pub async fn teams(&self) -> Result<Vec<TeamInfo>, StoreError> {
        let rows: Vec<TeamRow> =
            sqlx::query_as("SELECT slug, name, is_public FROM teams ORDER BY slug")
                .fetch_all(&self.pool)
                .await
                .map_err(store_err)?;
        Ok(rows.into_iter().map(TeamInfo::from).collect())
    }

    pub async fn members(&self, team: &str) -> Result<Vec<MemberInfo>, StoreError> {
        let rows: Vec<MemberRow> = sqlx::query_as(
            r#"
            SELECT team_slug, device_id, user_name, status, role FROM team_members
            WHERE team_slug = ? ORDER BY device_id
            "#,
        )
        .bind(team)
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(rows.into_iter().map(MemberInfo::from).collect())
    }

    /// Memberships of `device`, sent along with its pushes.
    pub async fn memberships(&self, device: &str) -> Result<Vec<MemberInfo>, StoreError> {
        let rows: Vec<MemberRow> = sqlx::query_as(
            r#"
            SELECT team_slug, device_id, user_name, status, role FROM team_members
            WHERE device_id = ? ORDER BY team_slug
            "#,
        )
        .bind(device)
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(rows.into_iter().map(MemberInfo::from).collect())
    }

    /// Sets a membership's status. Returns false if there is no such member.
    pub async fn set_status(
        &self,
        team: &str,
        device: &str,
        status: MemberStatus,
    ) -> Result<bool, StoreError> {
        let updated = sqlx::query(
            "UPDATE team_members SET status = ? WHERE team_slug = ? AND device_id = ?",
        )
        .bind(status.to_string())
        .bind(team)
        .bind(device)
        .execute(&self.pool)
        .await
        .map_err(store_err)?
        .rows_affected();
        Ok(updated > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;

    fn team(slug: &str, is_public: bool) -> TeamInfo {
        TeamInfo {
            slug: slug.to_string(),
            name: slug.to_uppercase(),
            is_public,
        }
    }

    fn member(team: &str, device: &str, status: MemberStatus) -> MemberInfo {
        MemberInfo {
            team_slug: team.to_string(),
            user_name: "Nurse".to_string(),
            device_id: device.to_string(),
            status,
            role: MemberRole::Member,
        }
    }

    #[tokio::test]
    async fn test_default_and_public_teams_are_open() {
        let (_dir, pool) = test_pool().await;
        let repo = TeamRepository::new(pool);
        repo.record_push(&[team("ph-clinic", true)], &[]).await.unwrap();

        assert!(repo.is_authorized(DEFAULT_TEAM, "anyone").await.unwrap());
        assert!(repo.is_authorized("ph-clinic", "anyone").await.unwrap());
        assert!(!repo.is_authorized("unknown", "anyone").await.unwrap());
    }

    #[tokio::test]
    async fn test_pushed_member_is_pending() {
        let (_dir, pool) = test_pool().await;
        let repo = TeamRepository::new(pool);

        let claimed = member("private", "Guest-X", MemberStatus::Approved);
        repo.record_push(&[team("private", false)], &[claimed])
            .await
            .unwrap();

        let members = repo.members("private").await.unwrap();
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].status, MemberStatus::Pending);
        assert!(!repo.is_authorized("private", "Guest-X").await.unwrap());
    }

    #[tokio::test]
    async fn test_push_never_changes_existing_member() {
        let (_dir, pool) = test_pool().await;
        let repo = TeamRepository::new(pool);
        let pending = member("private", "Guest-X", MemberStatus::Pending);
        repo.record_push(&[team("private", false)], &[pending.clone()])
            .await
            .unwrap();
        assert!(repo
            .set_status("private", "Guest-X", MemberStatus::Approved)
            .await
            .unwrap());

        repo.record_push(&[], &[pending]).await.unwrap();
        assert!(repo.is_authorized("private", "Guest-X").await.unwrap());

        repo.set_status("private", "Guest-X", MemberStatus::Rejected)
            .await
            .unwrap();
        let approved = member("private", "Guest-X", MemberStatus::Approved);
        repo.record_push(&[], &[approved]).await.unwrap();
        assert!(!repo.is_authorized("private", "Guest-X").await.unwrap());
    }

    #[tokio::test]
    async fn test_memberships_by_device() {
        let (_dir, pool) = test_pool().await;
        let repo = TeamRepository::new(pool);
        repo.record_push(
            &[],
            &[
                member("b-team", "tab", MemberStatus::Pending),
                member("a-team", "tab", MemberStatus::Pending),
                member("a-team", "phone", MemberStatus::Pending),
            ],
        )
        .await
        .unwrap();

        let teams: Vec<String> = repo
            .memberships("tab")
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.team_slug)
            .collect();
        assert_eq!(teams, vec!["a-team", "b-team"]);
        assert!(repo.teams().await.unwrap().iter().any(|t| t.slug == DEFAULT_TEAM));
    }
}
