use std::sync::Arc;

use crate::dsp::Window;
use crate::error::ConfigError;

/// Channel order worked out once from names, weights and the two designated
/// channels, then applied to every window.
///
/// Channels with zero weight are dropped. Remaining channels keep their
/// relative order, except that the designated channels (when selected) are
/// moved to the front, first designated at 0 and second at 1.
#[derive(Clone, Debug, PartialEq)]
pub struct ChannelSelection {
    indices: Vec<usize>,
    names: Arc<[String]>,
    designated_present: [bool; 2],
}

impl ChannelSelection {
    pub fn plan(
        channel_names: &[String],
        weight_mask: &[f64],
        designated: &[String; 2],
    ) -> Result<Self, ConfigError> {
        if weight_mask.len() != channel_names.len() {
            return Err(ConfigError::MaskLengthMismatch {
                expected: channel_names.len(),
                actual: weight_mask.len(),
            });
        }
        let selected = || {
            channel_names
                .iter()
                .zip(weight_mask)
                .enumerate()
                .filter(|(_, (_, weight))| **weight != 0.0)
                .map(|(index, (name, _))| (index, name))
        };
        let find = |wanted: &String| selected().find(|(_, name)| *name == wanted).map(|(i, _)| i);
        let front: Vec<usize> = designated.iter().filter_map(|name| find(name)).collect();
        let designated_present = [find(&designated[0]).is_some(), find(&designated[1]).is_some()];

        let mut indices = front.clone();
        indices.extend(
            selected()
                .map(|(index, _)| index)
                .filter(|index| !front.contains(index)),
        );
        let names: Vec<String> = indices.iter().map(|&i| channel_names[i].clone()).collect();
        Ok(Self {
            indices,
            names: names.into(),
            designated_present,
        })
    }

    /// Fails unless both designated channels made it into the selection.
    pub fn require_designated(&self, designated: &[String; 2]) -> Result<(), ConfigError> {
        for (present, name) in self.designated_present.iter().zip(designated) {
            if !present {
                return Err(ConfigError::MissingDesignatedChannel(name.clone()));
            }
        }
        Ok(())
    }

    /// Source channel index for each output position.
    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Reduced, reordered copy of the window.
    pub fn apply(&self, window: &Window) -> Window {
        Window {
            index: window.index,
            end_sample: window.end_sample,
            sample_rate_hz: window.sample_rate_hz,
            channel_labels: Arc::clone(&self.names),
            samples: self
                .indices
                .iter()
                .map(|&i| window.samples[i].clone())
                .collect(),
        }
    }
}

/// One-shot form of [`ChannelSelection`]: returns the reduced window and its
/// channel names.
pub fn select_channels(
    channel_names: &[String],
    weight_mask: &[f64],
    designated: &[String; 2],
    window: &Window,
) -> Result<(Window, Vec<String>), ConfigError> {
    let selection = ChannelSelection::plan(channel_names, weight_mask, designated)?;
    Ok((selection.apply(window), selection.names().to_vec()))
}
