use std::collections::HashSet;
use std::hash::{Hash, Hasher};

use serde::Serialize;

use crate::error::BdsError;
use crate::storage::{Node, NodePath, Storage};

pub const CHANNEL_PREFIX: &str = "channel";
pub const WAVELENGTH: &str = "wavelength";
pub const NUMBER_OF_CHANNELS: &str = "number_of_channels";
/// Upper bound accepted for `number_of_channels`.
pub const MAX_CHANNELS: u32 = 1024;

/// One acquisition channel. Identity is the counter alone.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct Channel {
    counter: u32,
    wavelength: i32,
}

impl Channel {
    pub fn new(counter: u32, wavelength: i32) -> Result<Self, BdsError> {
        if counter == 0 {
            return Err(BdsError::IllegalArgument(
                "channel counter must be positive".to_string(),
            ));
        }
        Ok(Self {
            counter,
            wavelength,
        })
    }

    pub fn counter(&self) -> u32 {
        self.counter
    }

    pub fn wavelength(&self) -> i32 {
        self.wavelength
    }

    pub fn directory_name(&self) -> String {
        format!("{CHANNEL_PREFIX}{}", self.counter)
    }

    pub fn save_to(&self, storage: &Storage, dir: &NodePath) -> Result<(), BdsError> {
        let node = storage.make_directory(dir, &self.directory_name())?;
        storage.add_key_value_pair(node.path(), WAVELENGTH, &self.wavelength.to_string())?;
        Ok(())
    }

    /// Reads a `channel{N}` directory.
    pub fn load_from(storage: &Storage, node: &Node) -> Result<Self, BdsError> {
        let counter = node
            .name()
            .strip_prefix(CHANNEL_PREFIX)
            .and_then(|rest| rest.parse::<u32>().ok())
            .ok_or_else(|| {
                BdsError::DataStructure(format!("not a channel directory: {}", node.path()))
            })?;
        let value = storage.get_value(node.path(), WAVELENGTH)?;
        let wavelength = value.trim().parse().map_err(|_| BdsError::InvalidParameter {
            name: node.path().join(WAVELENGTH).to_string(),
            value: value.clone(),
        })?;
        Self::new(counter, wavelength)
            .map_err(|_| BdsError::DataStructure(format!("invalid channel in {}", node.path())))
    }
}

impl PartialEq for Channel {
    fn eq(&self, other: &Self) -> bool {
        self.counter == other.counter
    }
}

impl Eq for Channel {}

impl Hash for Channel {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.counter.hash(state);
    }
}

/// Non-empty list of channels with distinct counters, in counter order when
/// loaded from storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelList {
    channels: Vec<Channel>,
}

impl ChannelList {
    pub fn new(channels: Vec<Channel>) -> Result<Self, BdsError> {
        if channels.is_empty() {
            return Err(BdsError::IllegalArgument(
                "channel list must not be empty".to_string(),
            ));
        }
        let mut seen = HashSet::new();
        let mut duplicates = Vec::new();
        for channel in &channels {
            if !seen.insert(channel.counter) {
                duplicates.push(channel);
            }
        }
        if !duplicates.is_empty() {
            let listed = duplicates
                .iter()
                .map(|channel| {
                    format!(
                        "{} (wavelength {})",
                        channel.directory_name(),
                        channel.wavelength
                    )
                })
                .collect::<Vec<_>>()
                .join(", ");
            return Err(BdsError::DuplicateChannels(listed));
        }
        Ok(Self { channels })
    }

    /// `count` placeholder channels numbered from 1, wavelength 0. The
    /// count must lie in `1..=MAX_CHANNELS`.
    pub fn create_from_string(value: &str) -> Result<Self, BdsError> {
        let count = value
            .trim()
            .parse::<u32>()
            .ok()
            .filter(|count| (1..=MAX_CHANNELS).contains(count))
            .ok_or_else(|| BdsError::InvalidParameter {
                name: NUMBER_OF_CHANNELS.to_string(),
                value: value.to_string(),
            })?;
        let channels = (1..=count)
            .map(|counter| Channel::new(counter, 0))
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(channels)
    }

    /// Collects the `channel{N}` sub-directories of `dir`.
    pub fn load_from(storage: &Storage, dir: &NodePath) -> Result<Self, BdsError> {
        let mut channels = storage
            .children(dir)?
            .into_iter()
            .filter(|node| node.is_directory() && node.name().starts_with(CHANNEL_PREFIX))
            .map(|node| Channel::load_from(storage, &node))
            .collect::<Result<Vec<_>, _>>()?;
        channels.sort_by_key(Channel::counter);
        if channels.is_empty() {
            return Err(BdsError::DataStructure(format!(
                "no channel directories in {dir}"
            )));
        }
        Self::new(channels)
    }

    pub fn has_stored_channels(storage: &Storage, dir: &NodePath) -> Result<bool, BdsError> {
        Ok(storage
            .children(dir)?
            .iter()
            .any(|node| node.is_directory() && node.name().starts_with(CHANNEL_PREFIX)))
    }

    pub fn save_to(&self, storage: &Storage, dir: &NodePath) -> Result<(), BdsError> {
        storage.add_key_value_pair(dir, NUMBER_OF_CHANNELS, &self.channel_count().to_string())?;
        for channel in &self.channels {
            channel.save_to(storage, dir)?;
        }
        Ok(())
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    pub fn iter(&self) -> impl Iterator<Item = &Channel> {
        self.channels.iter()
    }
}
