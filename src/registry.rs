//! The class registry: the seven Bristol chart types, in the order the model
//! emits them

use crate::error::{ClassifyError, Result};
use serde::Serialize;

/// Display metadata for one output class of the classifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ClassDescriptor {
    /// Position in the registry and in the model output
    pub index: usize,
    pub label: &'static str,
    pub title: &'static str,
    pub description: &'static str,
    /// Illustration shown next to the result
    pub image_ref: &'static str,
}

/// The Bristol stool-form chart
pub const BRISTOL_CHART: [ClassDescriptor; 7] = [
    ClassDescriptor {
        index: 0,
        label: "Type 1",
        title: "Separate hard lumps",
        description: "Separate hard lumps, like nuts, that are hard to pass. \
                      Indicates severe constipation.",
        image_ref: "images/type-1.png",
    },
    ClassDescriptor {
        index: 1,
        label: "Type 2",
        title: "Lumpy sausage",
        description: "Sausage-shaped but lumpy. Indicates mild constipation.",
        image_ref: "images/type-2.png",
    },
    ClassDescriptor {
        index: 2,
        label: "Type 3",
        title: "Cracked sausage",
        description: "Like a sausage but with cracks on its surface. \
                      Considered normal.",
        image_ref: "images/type-3.png",
    },
    ClassDescriptor {
        index: 3,
        label: "Type 4",
        title: "Smooth soft sausage",
        description: "Like a sausage or snake, smooth and soft. \
                      Considered the ideal stool form.",
        image_ref: "images/type-4.png",
    },
    ClassDescriptor {
        index: 4,
        label: "Type 5",
        title: "Soft blobs",
        description: "Soft blobs with clear-cut edges that are passed easily. \
                      Suggests a lack of dietary fibre.",
        image_ref: "images/type-5.png",
    },
    ClassDescriptor {
        index: 5,
        label: "Type 6",
        title: "Mushy, ragged pieces",
        description: "Fluffy pieces with ragged edges, a mushy stool. \
                      Indicates mild diarrhoea.",
        image_ref: "images/type-6.png",
    },
    ClassDescriptor {
        index: 6,
        label: "Type 7",
        title: "Entirely liquid",
        description: "Watery, no solid pieces. Indicates severe diarrhoea.",
        image_ref: "images/type-7.png",
    },
];

/// An immutable, ordered catalog of class descriptors
#[derive(Debug, Clone, Copy)]
pub struct ClassRegistry {
    classes: &'static [ClassDescriptor],
}

impl ClassRegistry {
    /// Build a registry, checking that each descriptor sits at its own index
    pub fn new(classes: &'static [ClassDescriptor]) -> anyhow::Result<Self> {
        anyhow::ensure!(!classes.is_empty(), "class registry is empty");
        for (position, class) in classes.iter().enumerate() {
            anyhow::ensure!(
                class.index == position,
                "class `{}` has index {} but sits at position {}",
                class.label,
                class.index,
                position
            );
        }
        Ok(ClassRegistry { classes })
    }

    /// The registry of the Bristol chart model
    pub fn bristol() -> Self {
        ClassRegistry {
            classes: &BRISTOL_CHART,
        }
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    /// Look up the descriptor for a model output index
    pub fn get(&self, index: usize) -> Result<&'static ClassDescriptor> {
        self.classes
            .get(index)
            .ok_or(ClassifyError::IndexOutOfRange {
                index,
                len: self.classes.len(),
            })
    }

    pub fn classes(&self) -> &'static [ClassDescriptor] {
        self.classes
    }
}
