use sqlx::PgPool;

use crate::db::rbac::{Action, RbacResolver, ResourceKind};
use crate::models::{
    Actor, ExchangeError, OrganizationNode, OrganizationRecord, OrganizationUserRecord,
    PractitionerRecord, Role,
};

/// Storage access for the organization tree and its memberships.
#[derive(Clone)]
pub struct OrganizationStore {
    pool: PgPool,
    rbac: RbacResolver,
}

impl OrganizationStore {
    pub fn new(pool: PgPool) -> Self {
        let rbac = RbacResolver::new(pool.clone());
        Self { pool, rbac }
    }

    pub async fn get(&self, organization_id: i64) -> Result<OrganizationRecord, ExchangeError> {
        sqlx::query_as::<_, OrganizationRecord>(
            "SELECT id, name, type, part_of FROM organization WHERE id = $1",
        )
        .bind(organization_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| {
            ExchangeError::not_found(format!("Organization {organization_id} does not exist."))
        })
    }

    pub async fn list(&self) -> Result<Vec<OrganizationRecord>, ExchangeError> {
        let rows = sqlx::query_as::<_, OrganizationRecord>(
            "SELECT id, name, type, part_of FROM organization ORDER BY name ASC, id ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Subtree rooted at the given organization, built in memory from a full
    /// table scan. The tree is display-only; authorization never follows it.
    pub async fn tree(&self, organization_id: i64) -> Result<OrganizationNode, ExchangeError> {
        let root = self.get(organization_id).await?;
        let all = self.list().await?;
        Ok(build_node(root, &all))
    }

    /// Deletion is refused while child organizations still point here. The
    /// caller reparents or removes children first.
    pub async fn delete(&self, actor: &Actor, organization_id: i64) -> Result<(), ExchangeError> {
        self.rbac
            .authorize(actor, ResourceKind::Organization, Action::Manage, organization_id)
            .await?;
        let children: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM organization WHERE part_of = $1")
                .bind(organization_id)
                .fetch_one(&self.pool)
                .await?;
        if children > 0 {
            return Err(ExchangeError::conflict(format!(
                "Organization {organization_id} still has {children} child organizations."
            )));
        }
        let result = sqlx::query("DELETE FROM organization WHERE id = $1")
            .bind(organization_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(ExchangeError::not_found(format!(
                "Organization {organization_id} does not exist."
            )));
        }
        Ok(())
    }

    pub async fn get_practitioner(
        &self,
        practitioner_id: i64,
    ) -> Result<PractitionerRecord, ExchangeError> {
        sqlx::query_as::<_, PractitionerRecord>(
            "SELECT id, identifier, name_family, name_given, birth_date, telecom_phone,
                    last_updated
             FROM practitioner WHERE id = $1",
        )
        .bind(practitioner_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| {
            ExchangeError::not_found(format!("Practitioner {practitioner_id} does not exist."))
        })
    }

    /// Practitioners of one organization with their membership role resolved.
    pub async fn list_users(
        &self,
        organization_id: i64,
    ) -> Result<Vec<OrganizationUserRecord>, ExchangeError> {
        self.get(organization_id).await?;
        let rows = sqlx::query_as::<_, OrganizationUserRecord>(
            "SELECT p.id AS practitioner_id, p.identifier, p.name_family, p.name_given, po.role
             FROM practitioner p
             JOIN practitioner_organization po ON po.practitioner_id = p.id
             WHERE po.organization_id = $1
             ORDER BY p.name_family ASC, p.name_given ASC, p.id ASC",
        )
        .bind(organization_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn add_practitioner(
        &self,
        actor: &Actor,
        organization_id: i64,
        practitioner_id: i64,
        role: Role,
    ) -> Result<(), ExchangeError> {
        self.rbac
            .authorize(actor, ResourceKind::Practitioner, Action::Manage, organization_id)
            .await?;
        self.get(organization_id).await?;
        let result = sqlx::query(
            "INSERT INTO practitioner_organization (practitioner_id, organization_id, role)
             VALUES ($1, $2, $3)
             ON CONFLICT (practitioner_id, organization_id) DO NOTHING",
        )
        .bind(practitioner_id)
        .bind(organization_id)
        .bind(role.as_str())
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(ExchangeError::conflict(format!(
                "Practitioner {practitioner_id} is already a member of organization {organization_id}."
            )));
        }
        Ok(())
    }

    pub async fn remove_practitioner(
        &self,
        actor: &Actor,
        organization_id: i64,
        practitioner_id: i64,
    ) -> Result<(), ExchangeError> {
        self.rbac
            .authorize(actor, ResourceKind::Practitioner, Action::Manage, organization_id)
            .await?;
        let result = sqlx::query(
            "DELETE FROM practitioner_organization
             WHERE practitioner_id = $1 AND organization_id = $2",
        )
        .bind(practitioner_id)
        .bind(organization_id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(ExchangeError::not_found(format!(
                "Practitioner {practitioner_id} is not a member of organization {organization_id}."
            )));
        }
        Ok(())
    }

    pub async fn add_patient(
        &self,
        actor: &Actor,
        organization_id: i64,
        patient_id: i64,
    ) -> Result<(), ExchangeError> {
        self.rbac
            .authorize(actor, ResourceKind::Patient, Action::Manage, organization_id)
            .await?;
        self.get(organization_id).await?;
        let result = sqlx::query(
            "INSERT INTO patient_organization (patient_id, organization_id)
             VALUES ($1, $2)
             ON CONFLICT (patient_id, organization_id) DO NOTHING",
        )
        .bind(patient_id)
        .bind(organization_id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(ExchangeError::conflict(format!(
                "Patient {patient_id} is already a member of organization {organization_id}."
            )));
        }
        Ok(())
    }

    pub async fn remove_patient(
        &self,
        actor: &Actor,
        organization_id: i64,
        patient_id: i64,
    ) -> Result<(), ExchangeError> {
        self.rbac
            .authorize(actor, ResourceKind::Patient, Action::Manage, organization_id)
            .await?;
        let result = sqlx::query(
            "DELETE FROM patient_organization
             WHERE patient_id = $1 AND organization_id = $2",
        )
        .bind(patient_id)
        .bind(organization_id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(ExchangeError::not_found(format!(
                "Patient {patient_id} is not a member of organization {organization_id}."
            )));
        }
        Ok(())
    }
}

fn build_node(record: OrganizationRecord, all: &[OrganizationRecord]) -> OrganizationNode {
    let children = all
        .iter()
        .filter(|candidate| candidate.part_of == Some(record.id))
        .cloned()
        .map(|child| build_node(child, all))
        .collect();
    OrganizationNode {
        organization: record,
        children,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn org(id: i64, name: &str, part_of: Option<i64>) -> OrganizationRecord {
        OrganizationRecord {
            id,
            name: name.to_string(),
            org_type: "prov".to_string(),
            part_of,
        }
    }

    #[test]
    fn tree_collects_nested_children() {
        let all = vec![
            org(1, "Root", None),
            org(2, "Cardiology", Some(1)),
            org(3, "Hypertension Clinic", Some(2)),
            org(4, "Oncology", Some(1)),
        ];
        let node = build_node(all[0].clone(), &all);
        assert_eq!(node.children.len(), 2);
        let cardiology = &node.children[0];
        assert_eq!(cardiology.organization.id, 2);
        assert_eq!(cardiology.children.len(), 1);
        assert_eq!(cardiology.children[0].organization.id, 3);
        assert!(node.children[1].children.is_empty());
    }

    #[test]
    fn tree_of_leaf_is_childless() {
        let all = vec![org(1, "Root", None), org(2, "Leaf", Some(1))];
        let node = build_node(all[1].clone(), &all);
        assert!(node.children.is_empty());
    }
}
