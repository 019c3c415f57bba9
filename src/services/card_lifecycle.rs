use std::{collections::HashSet, fmt, str::FromStr};

use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{
    audit_log::{AuditAction, AuditEntry, AuditLog},
    card::{Card, CardStatus, Deactivation, NewCard, PrintableCard},
    card_template::{CardTemplate, TemplateLayout},
    patient::Patient,
};
use crate::services::{
    barcode::{self, RandomnessError},
    card_renderer::{CardRenderer, RenderError, RenderedDocument},
    encryption::{self, EncryptionError},
    patient_registry::{PatientRegistry, RegistryError},
};

#[derive(thiserror::Error, Debug)]
pub enum LifecycleError {
    #[error("{0}")]
    Validation(String),

    #[error("Card not found")]
    CardNotFound,

    #[error("Patient not found")]
    PatientNotFound,

    #[error("Template not found")]
    TemplateNotFound,

    #[error("Card is inactive")]
    CardInactive,

    #[error("Card is already deactivated")]
    AlreadyInactive,

    #[error("Card is not assigned to a patient")]
    NotAssigned,

    #[error("Some selected cards are not available for {0}")]
    CardsUnavailable(&'static str),

    #[error("Replacement barcodes already exist: {}", .0.join(", "))]
    ReplacementBarcodesTaken(Vec<String>),

    #[error("Encryption error: {0}")]
    Encryption(#[from] EncryptionError),

    #[error("Barcode generation failed: {0}")]
    Randomness(#[from] RandomnessError),

    #[error("Card rendering failed: {0}")]
    Render(#[from] RenderError),

    #[error("Patient registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeactivationReason {
    Lost,
    Damaged,
    Stolen,
    Other,
}

impl DeactivationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeactivationReason::Lost => "lost",
            DeactivationReason::Damaged => "damaged",
            DeactivationReason::Stolen => "stolen",
            DeactivationReason::Other => "other",
        }
    }
}

impl fmt::Display for DeactivationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeactivationReason {
    type Err = LifecycleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "lost" => Ok(DeactivationReason::Lost),
            "damaged" => Ok(DeactivationReason::Damaged),
            "stolen" => Ok(DeactivationReason::Stolen),
            "other" => Ok(DeactivationReason::Other),
            _ => Err(LifecycleError::Validation(
                "Reason must be one of: lost, damaged, stolen, other".to_string(),
            )),
        }
    }
}

/// Original card and the card issued in its place
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Replacement {
    pub original_id: Uuid,
    pub replacement_id: Uuid,
    pub replacement_barcode: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PrintJob {
    pub cards: Vec<PrintableCard>,
    pub document: RenderedDocument,
}

/// Trims a required text field, rejecting absent or blank values
pub fn require_text(value: Option<String>, message: &str) -> Result<String, LifecycleError> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| LifecycleError::Validation(message.to_string()))
}

/// Parses a non-empty list of card ids, collapsing duplicates while keeping order
pub fn parse_card_ids(
    raw: Option<Vec<String>>,
    empty_message: &str,
) -> Result<Vec<Uuid>, LifecycleError> {
    let raw = raw.unwrap_or_default();
    if raw.is_empty() {
        return Err(LifecycleError::Validation(empty_message.to_string()));
    }

    let mut seen = HashSet::with_capacity(raw.len());
    let mut ids = Vec::with_capacity(raw.len());
    for value in raw {
        let id = Uuid::parse_str(value.trim())
            .map_err(|_| LifecycleError::Validation(format!("Invalid card id: {value}")))?;
        if seen.insert(id) {
            ids.push(id);
        }
    }

    Ok(ids)
}

/// Requested ids that are missing from `found` or fail `eligible`
pub fn unavailable_ids(
    requested: &[Uuid],
    found: &[Card],
    eligible: impl Fn(&Card) -> bool,
) -> Vec<Uuid> {
    let ok: HashSet<Uuid> = found
        .iter()
        .filter(|card| eligible(card))
        .map(|card| card.id)
        .collect();

    requested
        .iter()
        .filter(|id| !ok.contains(id))
        .copied()
        .collect()
}

/// Puts locked rows back into the order the caller listed them
fn in_request_order(requested: &[Uuid], mut cards: Vec<Card>) -> Vec<Card> {
    cards.sort_by_key(|card| requested.iter().position(|id| *id == card.id));
    cards
}

/// Opaque secret for a newly issued card: the sealed patient reference when
/// bound, a random value otherwise.
fn secret_for(patient_id: Option<&str>, card_key: &[u8; 32]) -> Result<String, LifecycleError> {
    match patient_id {
        Some(patient_id) => Ok(encryption::seal_patient_reference(patient_id, card_key)?),
        None => Ok(barcode::generate_unbound_secret()?),
    }
}

/// Assigns the card with `barcode_value` to a patient
#[tracing::instrument(skip(pool, card_key), fields(card_id = tracing::field::Empty))]
pub async fn assign_card(
    pool: &PgPool,
    card_key: &[u8; 32],
    barcode_value: &str,
    patient_id: &str,
    actor: &str,
) -> Result<Uuid, LifecycleError> {
    let mut tx = pool.begin().await?;

    let card = Card::lock_by_barcode(&mut *tx, barcode_value)
        .await?
        .ok_or(LifecycleError::CardNotFound)?;
    tracing::Span::current().record("card_id", tracing::field::display(card.id));

    if !Patient::exists(&mut *tx, patient_id).await? {
        return Err(LifecycleError::PatientNotFound);
    }

    if !card.can_be_assigned() {
        return Err(LifecycleError::CardInactive);
    }

    let sealed = encryption::seal_patient_reference(patient_id, card_key)?;
    Card::mark_assigned(&mut *tx, card.id, patient_id, &sealed, Utc::now(), actor).await?;

    AuditLog::record(
        &mut *tx,
        AuditEntry::new(
            AuditAction::CardAssigned,
            card.id,
            actor,
            json!({
                "patientId": patient_id,
                "barcodeValue": card.barcode_value,
                "previousPatientId": card.patient_id,
            }),
        ),
    )
    .await?;

    tx.commit().await?;

    tracing::info!(card_id = %card.id, "Card assigned");

    Ok(card.id)
}

/// Deactivates an active card and issues a replacement bound to the same patient
#[tracing::instrument(skip(pool, card_key))]
pub async fn deactivate_and_replace(
    pool: &PgPool,
    card_key: &[u8; 32],
    barcode_value: &str,
    reason: DeactivationReason,
    actor: &str,
) -> Result<Replacement, LifecycleError> {
    let mut tx = pool.begin().await?;

    let card = Card::lock_by_barcode(&mut *tx, barcode_value)
        .await?
        .ok_or(LifecycleError::CardNotFound)?;

    if !card.can_be_assigned() {
        return Err(LifecycleError::AlreadyInactive);
    }

    let now = Utc::now();
    let patient_id = card.patient_id.as_deref();
    let bound = patient_id.is_some();

    let replacement = Card::insert(
        &mut *tx,
        NewCard {
            id: Uuid::new_v4(),
            barcode_value: barcode::generate_barcode_value()?,
            unique_id: secret_for(patient_id, card_key)?,
            status: if bound {
                CardStatus::Assigned
            } else {
                CardStatus::Unassigned
            },
            patient_id: card.patient_id.clone(),
            batch_number: None,
            received_date: None,
            assigned_at: bound.then_some(now),
            assigned_by: bound.then(|| actor.to_string()),
        },
    )
    .await?;

    Card::mark_deactivated(
        &mut *tx,
        card.id,
        &Deactivation {
            reason: reason.as_str(),
            at: now,
            by: actor,
            replaced_by: replacement.id,
        },
    )
    .await?;

    AuditLog::record_all(
        &mut *tx,
        &[
            AuditEntry::new(
                AuditAction::CardDeactivated,
                card.id,
                actor,
                json!({
                    "reason": reason,
                    "oldBarcode": card.barcode_value,
                    "newBarcode": replacement.barcode_value,
                }),
            ),
            AuditEntry::new(
                AuditAction::CardAssigned,
                replacement.id,
                actor,
                json!({
                    "patientId": card.patient_id,
                    "reason": "replacement",
                    "replacesBarcode": card.barcode_value,
                }),
            ),
        ],
    )
    .await?;

    tx.commit().await?;

    tracing::info!(
        card_id = %card.id,
        replacement_id = %replacement.id,
        reason = %reason,
        "Card deactivated and replaced"
    );

    Ok(Replacement {
        original_id: card.id,
        replacement_id: replacement.id,
        replacement_barcode: replacement.barcode_value,
    })
}

/// Assigns every listed card to one patient, or none of them
#[tracing::instrument(skip(pool, card_key, card_ids), fields(cards = card_ids.len()))]
pub async fn batch_assign(
    pool: &PgPool,
    card_key: &[u8; 32],
    card_ids: &[Uuid],
    patient_id: &str,
    actor: &str,
) -> Result<usize, LifecycleError> {
    let mut tx = pool.begin().await?;

    if !Patient::exists(&mut *tx, patient_id).await? {
        return Err(LifecycleError::PatientNotFound);
    }

    let cards = in_request_order(card_ids, Card::lock_by_ids(&mut *tx, card_ids).await?);
    let unavailable = unavailable_ids(card_ids, &cards, Card::is_available_for_batch);
    if !unavailable.is_empty() {
        tracing::warn!(?unavailable, "Batch assignment rejected");
        return Err(LifecycleError::CardsUnavailable("assignment"));
    }

    let now = Utc::now();
    let mut entries = Vec::with_capacity(cards.len());
    for card in &cards {
        let sealed = encryption::seal_patient_reference(patient_id, card_key)?;
        Card::mark_assigned(&mut *tx, card.id, patient_id, &sealed, now, actor).await?;
        entries.push(AuditEntry::new(
            AuditAction::CardAssigned,
            card.id,
            actor,
            json!({ "patientId": patient_id, "barcodeValue": card.barcode_value }),
        ));
    }
    AuditLog::record_all(&mut *tx, &entries).await?;

    tx.commit().await?;

    tracing::info!(assigned = cards.len(), "Batch assignment completed");

    Ok(cards.len())
}

/// Deactivates every listed card and issues deterministic replacements, or
/// touches none of them
#[tracing::instrument(skip(pool, card_key, card_ids), fields(cards = card_ids.len()))]
pub async fn batch_deactivate(
    pool: &PgPool,
    card_key: &[u8; 32],
    card_ids: &[Uuid],
    reason: DeactivationReason,
    actor: &str,
) -> Result<Vec<Replacement>, LifecycleError> {
    let mut tx = pool.begin().await?;

    let cards = in_request_order(card_ids, Card::lock_by_ids(&mut *tx, card_ids).await?);
    let unavailable = unavailable_ids(card_ids, &cards, Card::can_be_assigned);
    if !unavailable.is_empty() {
        tracing::warn!(?unavailable, "Batch deactivation rejected");
        return Err(LifecycleError::CardsUnavailable("deactivation"));
    }

    let replacement_barcodes: Vec<String> = cards
        .iter()
        .map(|card| barcode::replacement_barcode(&card.barcode_value))
        .collect();
    let taken = Card::barcodes_in_use(&mut *tx, &replacement_barcodes).await?;
    if !taken.is_empty() {
        tracing::warn!(?taken, "Replacement barcodes already in use");
        return Err(LifecycleError::ReplacementBarcodesTaken(taken));
    }

    let now = Utc::now();
    let mut replacements = Vec::with_capacity(cards.len());
    let mut entries = Vec::with_capacity(cards.len() * 2);

    for (card, barcode_value) in cards.iter().zip(replacement_barcodes) {
        let patient_id = card.patient_id.as_deref();
        let bound = patient_id.is_some();

        let replacement = Card::insert(
            &mut *tx,
            NewCard {
                id: barcode::replacement_id(card.id),
                barcode_value,
                unique_id: secret_for(patient_id, card_key)?,
                status: if bound {
                    CardStatus::Assigned
                } else {
                    CardStatus::Unassigned
                },
                patient_id: card.patient_id.clone(),
                batch_number: None,
                received_date: None,
                assigned_at: bound.then_some(now),
                assigned_by: bound.then(|| actor.to_string()),
            },
        )
        .await?;

        Card::mark_deactivated(
            &mut *tx,
            card.id,
            &Deactivation {
                reason: reason.as_str(),
                at: now,
                by: actor,
                replaced_by: replacement.id,
            },
        )
        .await?;

        entries.push(AuditEntry::new(
            AuditAction::CardDeactivated,
            card.id,
            actor,
            json!({ "reason": reason, "replacementCardId": replacement.id }),
        ));
        entries.push(AuditEntry::new(
            AuditAction::CardCreated,
            replacement.id,
            actor,
            json!({
                "originalCardId": card.id,
                "reason": format!("Replacement for deactivated card: {reason}"),
            }),
        ));

        replacements.push(Replacement {
            original_id: card.id,
            replacement_id: replacement.id,
            replacement_barcode: replacement.barcode_value,
        });
    }

    AuditLog::record_all(&mut *tx, &entries).await?;
    tx.commit().await?;

    tracing::info!(
        deactivated = replacements.len(),
        reason = %reason,
        "Batch deactivation completed"
    );

    Ok(replacements)
}

/// Lists cards that may be printed right now
pub async fn printable_cards(pool: &PgPool) -> Result<Vec<PrintableCard>, LifecycleError> {
    Ok(PrintableCard::list_all(pool).await?)
}

/// Selects the requested cards for printing, renders them and audits each one.
/// Rejected as a whole if any requested card is not eligible.
#[tracing::instrument(skip(pool, renderer, card_ids), fields(cards = card_ids.len()))]
pub async fn print_cards(
    pool: &PgPool,
    renderer: &dyn CardRenderer,
    card_ids: &[Uuid],
    template_id: Option<Uuid>,
    actor: &str,
) -> Result<PrintJob, LifecycleError> {
    let layout = match template_id {
        Some(id) => {
            CardTemplate::find_by_id(pool, id)
                .await?
                .ok_or(LifecycleError::TemplateNotFound)?
                .layout
                .0
        }
        None => TemplateLayout::default(),
    };

    let mut tx = pool.begin().await?;

    let cards = PrintableCard::lock_eligible(&mut *tx, card_ids).await?;
    if cards.len() != card_ids.len() {
        tracing::warn!(
            requested = card_ids.len(),
            eligible = cards.len(),
            "Print request rejected"
        );
        return Err(LifecycleError::CardsUnavailable("printing"));
    }

    let document = renderer.render(&cards, &layout)?;

    let entries: Vec<AuditEntry> = cards
        .iter()
        .map(|card| {
            AuditEntry::new(
                AuditAction::CardPrinted,
                card.id,
                actor,
                json!({ "patientId": card.patient_id, "templateId": template_id }),
            )
        })
        .collect();
    AuditLog::record_all(&mut *tx, &entries).await?;

    tx.commit().await?;

    tracing::info!(printed = cards.len(), "Print job prepared");

    Ok(PrintJob { cards, document })
}

/// Resolves the patient bound to a scanned card
#[tracing::instrument(skip(pool, card_key, registry))]
pub async fn lookup_patient(
    pool: &PgPool,
    card_key: &[u8; 32],
    registry: &PatientRegistry,
    barcode_value: &str,
    actor: &str,
) -> Result<Patient, LifecycleError> {
    let card = Card::find_by_barcode(pool, barcode_value)
        .await?
        .ok_or(LifecycleError::CardNotFound)?;

    if !card.can_be_assigned() {
        return Err(LifecycleError::CardInactive);
    }
    if !card.is_printable() {
        return Err(LifecycleError::NotAssigned);
    }

    let patient_id = encryption::open_patient_reference(&card.unique_id, card_key)?;
    if card.patient_id.as_deref() != Some(patient_id.as_str()) {
        tracing::warn!(card_id = %card.id, "Card secret does not match the stored patient reference");
    }

    // The registry call happens outside any transaction
    let patient = registry
        .fetch_patient(pool, &patient_id)
        .await?
        .ok_or(LifecycleError::PatientNotFound)?;

    let mut conn = pool.acquire().await?;
    AuditLog::record(
        &mut *conn,
        AuditEntry::new(
            AuditAction::CardLookup,
            card.id,
            actor,
            json!({ "patientId": patient_id, "barcodeValue": card.barcode_value }),
        ),
    )
    .await?;

    tracing::info!(card_id = %card.id, "Patient looked up by card");

    Ok(patient)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn card(status: CardStatus, is_active: bool) -> Card {
        Card {
            id: Uuid::new_v4(),
            barcode_value: format!("BC-{}", Uuid::new_v4().simple()),
            unique_id: "secret".to_string(),
            status,
            is_active,
            patient_id: None,
            batch_number: None,
            received_date: None,
            assigned_at: None,
            assigned_by: None,
            deactivated_at: None,
            deactivated_by: None,
            deactivation_reason: None,
            replaced_by: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn reason_parses_known_values() {
        assert_eq!(
            "lost".parse::<DeactivationReason>().unwrap(),
            DeactivationReason::Lost
        );
        assert_eq!(
            " Damaged ".parse::<DeactivationReason>().unwrap(),
            DeactivationReason::Damaged
        );
        assert!(matches!(
            "misplaced".parse::<DeactivationReason>(),
            Err(LifecycleError::Validation(_))
        ));
    }

    #[test]
    fn require_text_rejects_blank_values() {
        assert_eq!(
            require_text(Some("  ABC123 ".to_string()), "required").unwrap(),
            "ABC123"
        );
        assert!(require_text(Some("   ".to_string()), "required").is_err());
        assert!(require_text(None, "required").is_err());
    }

    #[test]
    fn card_ids_must_be_present_and_valid() {
        assert!(matches!(
            parse_card_ids(None, "No cards selected"),
            Err(LifecycleError::Validation(msg)) if msg == "No cards selected"
        ));
        assert!(parse_card_ids(Some(vec![]), "No cards selected").is_err());
        assert!(parse_card_ids(Some(vec!["not-a-uuid".to_string()]), "x").is_err());
    }

    #[test]
    fn duplicate_card_ids_collapse() {
        let id = Uuid::new_v4();
        let other = Uuid::new_v4();
        let ids = parse_card_ids(
            Some(vec![id.to_string(), other.to_string(), id.to_string()]),
            "x",
        )
        .unwrap();

        assert_eq!(ids, vec![id, other]);
    }

    #[test]
    fn one_ineligible_card_blocks_the_whole_batch() {
        let ready = card(CardStatus::Unassigned, true);
        let in_stock = card(CardStatus::Available, true);
        let taken = card(CardStatus::Assigned, true);
        let requested = [ready.id, in_stock.id, taken.id];

        let found = vec![ready, in_stock, taken.clone()];
        let blocked = unavailable_ids(&requested, &found, Card::is_available_for_batch);

        assert_eq!(blocked, vec![taken.id]);
    }

    #[test]
    fn missing_cards_are_unavailable() {
        let present = card(CardStatus::Assigned, true);
        let missing = Uuid::new_v4();

        let blocked = unavailable_ids(
            &[present.id, missing],
            std::slice::from_ref(&present),
            Card::can_be_assigned,
        );

        assert_eq!(blocked, vec![missing]);
    }

    #[test]
    fn deactivation_requires_every_card_active() {
        let active = card(CardStatus::Assigned, true);
        let retired = card(CardStatus::Inactive, false);

        let blocked = unavailable_ids(
            &[active.id, retired.id],
            &[active.clone(), retired.clone()],
            Card::can_be_assigned,
        );

        assert_eq!(blocked, vec![retired.id]);
    }

    #[test]
    fn locked_rows_follow_request_order() {
        let a = card(CardStatus::Assigned, true);
        let b = card(CardStatus::Assigned, true);
        let c = card(CardStatus::Assigned, true);
        let requested = [c.id, a.id, b.id];

        let ordered = in_request_order(&requested, vec![a, b, c]);
        let ids: Vec<Uuid> = ordered.iter().map(|card| card.id).collect();

        assert_eq!(ids, requested);
    }

    #[test]
    fn unbound_replacements_get_random_secrets() {
        let key = encryption::derive_key("test");

        let bound = secret_for(Some("P1"), &key).unwrap();
        assert_eq!(encryption::open_patient_reference(&bound, &key).unwrap(), "P1");

        let unbound = secret_for(None, &key).unwrap();
        assert_eq!(unbound.len(), 32);
        assert!(encryption::open_patient_reference(&unbound, &key).is_err());
    }
}
