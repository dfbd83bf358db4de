use std::{sync::Arc, time::Duration};

use crate::{
    error::{CoreResult, bounded},
    models::RelationshipEntity,
    store::RelationshipStore,
};

/// Read-only resolver over patient <-> caregiver links.
#[derive(Clone)]
pub struct CareRelationshipGraph {
    relationships: Arc<dyn RelationshipStore>,
    timeout: Duration,
}

impl CareRelationshipGraph {
    pub fn new(relationships: Arc<dyn RelationshipStore>, timeout: Duration) -> Self {
        Self {
            relationships,
            timeout,
        }
    }

    /// Caregivers flagged as primary contacts on an active relationship with the patient.
    pub async fn primary_contacts_of(&self, patient_id: i32) -> CoreResult<Vec<i32>> {
        let active = bounded(
            self.timeout,
            "load patient relationships",
            self.relationships.active_for_patient(patient_id),
        )
        .await?;

        Ok(active
            .into_iter()
            .filter(|rel| rel.is_active && rel.is_primary_contact)
            .map(|rel| rel.caregiver_id)
            .collect())
    }

    pub async fn is_active_relationship(
        &self,
        patient_id: i32,
        caregiver_id: i32,
    ) -> CoreResult<bool> {
        Ok(self
            .relationship_of(patient_id, caregiver_id)
            .await?
            .is_some_and(|rel| rel.is_active))
    }

    pub async fn relationship_of(
        &self,
        patient_id: i32,
        caregiver_id: i32,
    ) -> CoreResult<Option<RelationshipEntity>> {
        bounded(
            self.timeout,
            "load relationship",
            self.relationships.find_pair(patient_id, caregiver_id),
        )
        .await
    }

    /// Patients the caregiver actively looks after.
    pub async fn patients_of(&self, caregiver_id: i32) -> CoreResult<Vec<i32>> {
        let active = bounded(
            self.timeout,
            "load caregiver relationships",
            self.relationships.active_for_caregiver(caregiver_id),
        )
        .await?;

        Ok(active.into_iter().map(|rel| rel.patient_id).collect())
    }
}
