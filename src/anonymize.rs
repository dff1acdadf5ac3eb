use std::path::Path;

use dicom_core::header::Header;
use dicom_core::value::{DataSetSequence, PrimitiveValue, Value};
use dicom_core::{DataElement, Length, Tag, VR};
use dicom_object::{InMemDicomObject, open_file};

use crate::error::RetrieverError;

const PATIENT_ID: Tag = Tag(0x0010, 0x0020);
const PATIENT_BIRTH_DATE: Tag = Tag(0x0010, 0x0030);

/// Type 3 patient attributes that are dropped outright.
const REMOVED_TAGS: &[Tag] = &[
    Tag(0x0010, 0x1000), // OtherPatientIDs
    Tag(0x0010, 0x1002), // OtherPatientIDsSequence
    Tag(0x0010, 0x1001), // OtherPatientNames
    Tag(0x0010, 0x1040), // PatientAddress
    Tag(0x0010, 0x2154), // PatientTelephoneNumbers
    Tag(0x0010, 0x1060), // PatientMotherBirthName
    Tag(0x0010, 0x1005), // PatientBirthName
    Tag(0x0010, 0x0032), // PatientBirthTime
];

pub trait Anonymizer: Send + Sync {
    /// Reads the payload at `source` and writes a de-identified copy to `destination`.
    fn anonymize(&self, source: &Path, destination: &Path) -> Result<(), RetrieverError>;
}

/// De-identification through `dicom-object`.
///
/// Person names become `anonymous`, the patient id becomes `id`, the birth
/// date is blanked, other patient identifiers and private tags are removed.
#[derive(Debug, Clone)]
pub struct DicomAnonymizer {
    person_name: String,
    patient_id: String,
}

impl Default for DicomAnonymizer {
    fn default() -> Self {
        Self {
            person_name: "anonymous".to_string(),
            patient_id: "id".to_string(),
        }
    }
}

impl DicomAnonymizer {
    /// Scrubs `obj` and every item nested in its sequences.
    pub fn scrub(&self, obj: &mut InMemDicomObject) {
        let mut renamed = Vec::new();
        let mut private = Vec::new();
        let mut sequences = Vec::new();
        for element in obj.iter() {
            let tag = element.tag();
            if tag.group() % 2 == 1 {
                private.push(tag);
            } else if element.vr() == VR::PN {
                renamed.push(tag);
            } else if element.vr() == VR::SQ && !REMOVED_TAGS.contains(&tag) {
                sequences.push(tag);
            }
        }

        for tag in private {
            obj.remove_element(tag);
        }
        for tag in REMOVED_TAGS {
            obj.remove_element(*tag);
        }
        for tag in renamed {
            obj.put(DataElement::new(
                tag,
                VR::PN,
                PrimitiveValue::from(self.person_name.as_str()),
            ));
        }
        if obj.element(PATIENT_ID).is_ok() {
            obj.put(DataElement::new(
                PATIENT_ID,
                VR::LO,
                PrimitiveValue::from(self.patient_id.as_str()),
            ));
        }
        if obj.element(PATIENT_BIRTH_DATE).is_ok() {
            obj.put(DataElement::new(
                PATIENT_BIRTH_DATE,
                VR::DA,
                PrimitiveValue::Empty,
            ));
        }
        for tag in sequences {
            self.scrub_sequence(obj, tag);
        }
    }

    fn scrub_sequence(&self, obj: &mut InMemDicomObject, tag: Tag) {
        let Ok(element) = obj.take_element(tag) else {
            return;
        };
        let vr = element.vr();
        match element.into_value() {
            Value::Sequence(seq) => {
                let length: Length = seq.length();
                let mut items = seq.into_items();
                for item in items.iter_mut() {
                    self.scrub(item);
                }
                obj.put(DataElement::new(
                    tag,
                    VR::SQ,
                    Value::Sequence(DataSetSequence::new(items, length)),
                ));
            }
            value => {
                obj.put(DataElement::new(tag, vr, value));
            }
        }
    }
}

impl Anonymizer for DicomAnonymizer {
    fn anonymize(&self, source: &Path, destination: &Path) -> Result<(), RetrieverError> {
        let mut obj = open_file(source).map_err(|err| {
            RetrieverError::Anonymize(format!("read {}: {err}", source.display()))
        })?;
        self.scrub(&mut obj);
        obj.write_to_file(destination).map_err(|err| {
            RetrieverError::Anonymize(format!("write {}: {err}", destination.display()))
        })
    }
}
