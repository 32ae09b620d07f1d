// Copyright 2025 HEM Sp. z o.o.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::fmt;

use bitflags::bitflags;

/// Address of a single input or output connector, unique per role within one component.
pub type ConnectorAddress = u32;

bitflags! {
    /// Media classes a connector carries or an operation affects.
    ///
    /// A value with exactly one bit set is *elementary*; an OR-combination of several is
    /// *composite*. The empty value is "none" and is never a valid operand for a mutation.
    #[derive(Debug, Clone, Copy, Default, Eq, PartialEq, Hash, PartialOrd, Ord)]
    pub struct ConnectionType: u8 {
        const Audio = 0x01;
        const Video = 0x02;
        const Usb = 0x04;

        const AudioVideo = Self::Audio.bits() | Self::Video.bits();
    }
}

impl ConnectionType {
    /// True when exactly one media class is set.
    pub fn is_elementary(self) -> bool {
        self.bits().count_ones() == 1
    }

    /// True when more than one media class is set.
    pub fn is_composite(self) -> bool {
        self.bits().count_ones() > 1
    }

    /// Splits the value into its elementary flags, lowest bit first.
    ///
    /// The order is stable (Audio, Video, Usb) so that callers observing per-flag side
    /// effects see a deterministic sequence.
    pub fn elementary(self) -> impl Iterator<Item = ConnectionType> {
        (0..u8::BITS)
            .map(|bit| 1u8 << bit)
            .filter(move |mask| self.bits() & mask != 0)
            .map(ConnectionType::from_bits_retain)
    }

    /// OR-combines a sequence of flags into one value.
    pub fn aggregate<I>(flags: I) -> ConnectionType
    where
        I: IntoIterator<Item = ConnectionType>,
    {
        flags.into_iter().fold(ConnectionType::empty(), |acc, f| acc | f)
    }
}

impl fmt::Display for ConnectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "None");
        }
        let mut first = true;
        for flag in self.elementary() {
            if !first {
                write!(f, "|")?;
            }
            first = false;
            if flag == ConnectionType::Audio {
                write!(f, "Audio")?;
            } else if flag == ConnectionType::Video {
                write!(f, "Video")?;
            } else if flag == ConnectionType::Usb {
                write!(f, "Usb")?;
            } else {
                write!(f, "{:#04x}", flag.bits())?;
            }
        }
        Ok(())
    }
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum ConnectorRole {
    Input = 0,
    Output = 1,
}

impl fmt::Display for ConnectorRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Input => write!(f, "input"),
            Self::Output => write!(f, "output"),
        }
    }
}

/// Immutable descriptor of one connector: its address and the media classes it carries.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectorInfo {
    address: ConnectorAddress,
    connection_type: ConnectionType,
    name: Option<String>,
}

impl ConnectorInfo {
    pub fn new(address: ConnectorAddress, connection_type: ConnectionType) -> Self {
        Self { address, connection_type, name: None }
    }

    /// Attaches a display name. The name never takes part in identity lookups.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn address(&self) -> ConnectorAddress {
        self.address
    }

    pub fn connection_type(&self) -> ConnectionType {
        self.connection_type
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Whether every media class in `flags` is carried by this connector.
    pub fn supports(&self, flags: ConnectionType) -> bool {
        !flags.is_empty() && self.connection_type.contains(flags)
    }
}
