use std::collections::{BTreeMap, BTreeSet};
use std::io::Read;

use serde::Deserialize;
use tracing::{debug, info};

use crate::scoring::assertion::ByteRange;
use crate::scoring::confusion::KnownPositives;
use crate::scoring::error::ScoreError;
use super::Mode;

/// Slot types assessors annotated that are not part of the official
/// inventory; only scored when requested by name.
pub const UNOFFICIAL_SLOT_TYPES: [&str; 2] = ["SignificantOther", "Children"];

#[derive(Debug, Deserialize)]
struct NativeEquivalenceClass {
    stream_ids: BTreeMap<String, (String, Vec<(u64, u64)>)>,
}

/// entity_id -> slot_type -> equivalence_id -> class
type NativeTruth = BTreeMap<String, BTreeMap<String, BTreeMap<String, NativeEquivalenceClass>>>;

/// (entity_id, slot_type, truth equivalence id)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClassKey {
    pub entity_id: String,
    pub slot_type: String,
    pub equivalence_id: String,
}

/// (document_id, entity_id, slot_type)
pub type DocumentKey = (String, String, String);

/// Where one document substantiates one equivalence class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TruthMention {
    pub date_hour: String,
    pub offsets: Vec<ByteRange>,
}

/// Slot-fill truth, indexed both by equivalence class and by document.
#[derive(Debug, Clone, Default)]
pub struct SsfTruth {
    classes: BTreeMap<ClassKey, BTreeMap<String, TruthMention>>,
    by_document: BTreeMap<DocumentKey, BTreeSet<String>>,
    positives: [KnownPositives; 4],
    slot_type_filter: Option<String>,
}

impl SsfTruth {
    pub fn from_reader<R: Read>(
        reader: R,
        reject: impl Fn(&str) -> bool,
        slot_type_filter: Option<&str>,
    ) -> Result<Self, ScoreError> {
        let native: NativeTruth = serde_json::from_reader(reader)?;

        let mut truth = Self {
            slot_type_filter: slot_type_filter.map(ToOwned::to_owned),
            ..Self::default()
        };

        for (entity_id, slots) in native {
            if reject(&entity_id) {
                debug!(entity = %entity_id, "excluding truth data for rejected entity");
                continue;
            }

            for (slot_type, fills) in slots {
                if !truth.scores_slot_type(&slot_type) {
                    debug!(slot_type = %slot_type, "excluding truth data for slot type");
                    continue;
                }

                for (equivalence_id, class) in fills {
                    let key = ClassKey {
                        entity_id: entity_id.clone(),
                        slot_type: slot_type.clone(),
                        equivalence_id,
                    };
                    let mentions = class
                        .stream_ids
                        .into_iter()
                        .map(|(document_id, (date_hour, offsets))| {
                            let offsets = offsets
                                .into_iter()
                                .map(|(a, b)| ByteRange::new(a.min(b), a.max(b)))
                                .collect();
                            (document_id, TruthMention { date_hour, offsets })
                        })
                        .collect();
                    truth.insert_class(key, mentions);
                }
            }
        }

        truth.recompute_positives();
        info!(
            classes = truth.classes.len(),
            document_keys = truth.by_document.len(),
            docs_positives = truth.positives(Mode::Docs).total(),
            "loaded SSF truth data"
        );
        truth.ensure_positives()?;
        Ok(truth)
    }

    #[cfg(test)]
    pub fn from_classes(classes: BTreeMap<ClassKey, BTreeMap<String, TruthMention>>) -> Self {
        let mut truth = Self::default();
        for (key, mentions) in classes {
            truth.insert_class(key, mentions);
        }
        truth.recompute_positives();
        truth
    }

    fn insert_class(&mut self, key: ClassKey, mentions: BTreeMap<String, TruthMention>) {
        if mentions.is_empty() {
            return;
        }
        for document_id in mentions.keys() {
            self.by_document
                .entry((
                    document_id.clone(),
                    key.entity_id.clone(),
                    key.slot_type.clone(),
                ))
                .or_default()
                .insert(key.equivalence_id.clone());
        }
        self.classes.insert(key, mentions);
    }

    /// True when run rows of this slot type take part in scoring.
    pub fn scores_slot_type(&self, slot_type: &str) -> bool {
        match &self.slot_type_filter {
            Some(wanted) => wanted == slot_type,
            None => !UNOFFICIAL_SLOT_TYPES.contains(&slot_type),
        }
    }

    fn recompute_positives(&mut self) {
        let mut positives: [KnownPositives; 4] = Default::default();

        let mut document_pairs: BTreeSet<(&str, &str, &str)> = BTreeSet::new();
        for (key, mentions) in &self.classes {
            for document_id in mentions.keys() {
                document_pairs.insert((
                    key.entity_id.as_str(),
                    key.slot_type.as_str(),
                    document_id.as_str(),
                ));
            }
            let mention_count = mentions.len() as u64;
            positives[Mode::Overlap.index()].add(&key.entity_id, mention_count);
            positives[Mode::Fill.index()].add(&key.entity_id, mention_count);
            positives[Mode::DateHour.index()].add(&key.entity_id, 1);
        }
        for (entity_id, _, _) in document_pairs {
            positives[Mode::Docs.index()].add(entity_id, 1);
        }

        self.positives = positives;
    }

    fn ensure_positives(&self) -> Result<(), ScoreError> {
        if self.positives(Mode::Docs).total() == 0 {
            return Err(ScoreError::NoPositives {
                context: format!(
                    "{} equivalence classes after entity and slot type filters",
                    self.classes.len()
                ),
            });
        }
        Ok(())
    }

    /// Keeps only (document, entity, slot_type) keys some run asserted.
    pub fn retain_pooled(&mut self, asserted: &BTreeSet<DocumentKey>) -> Result<(), ScoreError> {
        let before = self.by_document.len();
        self.by_document.retain(|key, _| asserted.contains(key));

        for (key, mentions) in self.classes.iter_mut() {
            mentions.retain(|document_id, _| {
                asserted.contains(&(
                    document_id.clone(),
                    key.entity_id.clone(),
                    key.slot_type.clone(),
                ))
            });
        }
        self.classes.retain(|_, mentions| !mentions.is_empty());

        info!(
            before,
            after = self.by_document.len(),
            "restricted SSF truth data to pooled documents"
        );
        self.recompute_positives();
        self.ensure_positives()
    }

    pub fn has_document_key(&self, document_id: &str, entity_id: &str, slot_type: &str) -> bool {
        self.by_document.contains_key(&(
            document_id.to_string(),
            entity_id.to_string(),
            slot_type.to_string(),
        ))
    }

    /// Truth classes this document substantiates for (entity, slot_type).
    pub fn classes_for<'a>(
        &'a self,
        document_id: &'a str,
        entity_id: &str,
        slot_type: &str,
    ) -> impl Iterator<Item = (&'a str, &'a TruthMention)> + 'a {
        let key = (
            document_id.to_string(),
            entity_id.to_string(),
            slot_type.to_string(),
        );
        let entity_id = entity_id.to_string();
        let slot_type = slot_type.to_string();

        self.by_document
            .get(&key)
            .into_iter()
            .flatten()
            .filter_map(move |equivalence_id| {
                let class_key = ClassKey {
                    entity_id: entity_id.clone(),
                    slot_type: slot_type.clone(),
                    equivalence_id: equivalence_id.clone(),
                };
                self.classes
                    .get(&class_key)
                    .and_then(|mentions| mentions.get(document_id))
                    .map(|mention| (equivalence_id.as_str(), mention))
            })
    }

    /// Earliest hour any assessor found evidence for this class.
    pub fn earliest_date_hour(&self, class: &ClassKey) -> Option<&str> {
        self.classes
            .get(class)?
            .values()
            .map(|mention| mention.date_hour.as_str())
            .min()
    }

    pub fn positives(&self, mode: Mode) -> &KnownPositives {
        &self.positives[mode.index()]
    }
}
