use crate::error::DescriptorError;

use super::{
    read_descriptor, read_fixed, record_at, BosDescriptor, ConfigDescriptor, Descriptor,
    DeviceCapabilityHeader, DeviceDescriptor, EndpointDescriptor, InterfaceAssocDescriptor,
    InterfaceDescriptor, SsEndpointCompanionDescriptor, USB_DESCRIPTOR_TYPE_BOS,
    USB_DESCRIPTOR_TYPE_CONFIGURATION, USB_DESCRIPTOR_TYPE_DEVICE,
    USB_DESCRIPTOR_TYPE_DEVICE_CAPABILITY, USB_DESCRIPTOR_TYPE_ENDPOINT,
    USB_DESCRIPTOR_TYPE_INTERFACE, USB_DESCRIPTOR_TYPE_INTERFACE_ASSOCIATION,
    USB_DESCRIPTOR_TYPE_OTHER_SPEED_CONFIGURATION, USB_DESCRIPTOR_TYPE_SS_ENDPOINT_COMPANION,
};

/// A configuration descriptor set, parsed into a tree that borrows from the raw buffer.
///
/// Interfaces are grouped by `bInterfaceNumber`, each holding its alternate settings in the order
/// they appeared. Class and vendor specific descriptors are kept verbatim as the `extra` bytes of
/// the standard descriptor they follow.
#[derive(Debug, Clone)]
pub struct ParsedConfig<'a> {
    pub header: ConfigDescriptor,
    header_raw: &'a [u8],
    pub extra: &'a [u8],
    pub interfaces: Vec<ParsedInterface<'a>>,
}

#[derive(Debug, Clone)]
pub struct ParsedInterface<'a> {
    pub number: u8,
    /// The interface association that names this interface as its first member.
    pub association: Option<InterfaceAssocDescriptor>,
    association_raw: &'a [u8],
    pub alternates: Vec<ParsedAltSetting<'a>>,
}

#[derive(Debug, Clone)]
pub struct ParsedAltSetting<'a> {
    pub header: InterfaceDescriptor,
    header_raw: &'a [u8],
    pub extra: &'a [u8],
    pub endpoints: Vec<ParsedEndpoint<'a>>,
}

#[derive(Debug, Clone)]
pub struct ParsedEndpoint<'a> {
    pub header: EndpointDescriptor,
    header_raw: &'a [u8],
    pub companion: Option<SsEndpointCompanionDescriptor>,
    companion_raw: &'a [u8],
    pub extra: &'a [u8],
}

#[derive(Clone, Copy)]
enum Cursor {
    Config,
    Alt { iface: usize, alt: usize },
    Endpoint { iface: usize, alt: usize, ep: usize },
}

/// Extends `extra`, which ends exactly at `offset`, over the record `buf[offset..offset + len]`.
fn grow<'a>(extra: &mut &'a [u8], buf: &'a [u8], offset: usize, len: usize) {
    let start = offset - extra.len();
    *extra = &buf[start..offset + len];
}

/// Parses a full configuration descriptor set (as returned by `GET_DESCRIPTOR(CONFIGURATION)`).
///
/// The whole of `buf` is parsed; `wTotalLength` is not trusted; see
/// [`ParsedConfig::check_total_length`].
pub fn parse_configuration(buf: &[u8]) -> Result<ParsedConfig<'_>, DescriptorError> {
    let (kind, header_raw) = record_at(buf, 0, ConfigDescriptor::MIN_LEN)?;
    if kind != USB_DESCRIPTOR_TYPE_CONFIGURATION
        && kind != USB_DESCRIPTOR_TYPE_OTHER_SPEED_CONFIGURATION
    {
        return Err(DescriptorError::UnexpectedType {
            offset: 0,
            expected: USB_DESCRIPTOR_TYPE_CONFIGURATION,
            found: kind,
        });
    }

    let mut config = ParsedConfig {
        header: read_fixed(header_raw),
        header_raw,
        extra: &[],
        interfaces: Vec::new(),
    };
    let mut pending_iad: Option<(usize, InterfaceAssocDescriptor, &[u8])> = None;
    let mut associations = Vec::new();
    let mut cursor = Cursor::Config;
    let mut offset = header_raw.len();

    while offset < buf.len() {
        let (kind, raw) = record_at(buf, offset, 2)?;
        match kind {
            USB_DESCRIPTOR_TYPE_INTERFACE => {
                let (_, raw) = record_at(buf, offset, InterfaceDescriptor::MIN_LEN)?;
                let header: InterfaceDescriptor = read_fixed(raw);
                let number = header.b_interface_number;
                let iface = match config.interfaces.iter().position(|i| i.number == number) {
                    Some(idx) => idx,
                    None => {
                        config.interfaces.push(ParsedInterface {
                            number,
                            association: None,
                            association_raw: &[],
                            alternates: Vec::new(),
                        });
                        config.interfaces.len() - 1
                    }
                };
                let entry = &mut config.interfaces[iface];
                if let Some((iad_offset, iad, iad_raw)) = pending_iad.take() {
                    if iad.b_first_interface != number {
                        return Err(DescriptorError::AssociationMismatch {
                            offset: iad_offset,
                            first: iad.b_first_interface,
                            found: number,
                        });
                    }
                    entry.association = Some(iad);
                    entry.association_raw = iad_raw;
                    associations.push((iad_offset, iad));
                }
                entry.alternates.push(ParsedAltSetting {
                    header,
                    header_raw: raw,
                    extra: &[],
                    endpoints: Vec::new(),
                });
                cursor = Cursor::Alt {
                    iface,
                    alt: entry.alternates.len() - 1,
                };
            }
            USB_DESCRIPTOR_TYPE_ENDPOINT => {
                if let Some((iad_offset, ..)) = pending_iad {
                    return Err(DescriptorError::DanglingAssociation { offset: iad_offset });
                }
                let (Cursor::Alt { iface, alt } | Cursor::Endpoint { iface, alt, .. }) = cursor
                else {
                    return Err(DescriptorError::Misplaced { offset, kind });
                };
                let (_, raw) = record_at(buf, offset, EndpointDescriptor::MIN_LEN)?;
                let endpoints = &mut config.interfaces[iface].alternates[alt].endpoints;
                endpoints.push(ParsedEndpoint {
                    header: read_fixed(raw),
                    header_raw: raw,
                    companion: None,
                    companion_raw: &[],
                    extra: &[],
                });
                cursor = Cursor::Endpoint {
                    iface,
                    alt,
                    ep: endpoints.len() - 1,
                };
            }
            USB_DESCRIPTOR_TYPE_SS_ENDPOINT_COMPANION => {
                let Cursor::Endpoint { iface, alt, ep } = cursor else {
                    return Err(DescriptorError::Misplaced { offset, kind });
                };
                let endpoint = &mut config.interfaces[iface].alternates[alt].endpoints[ep];
                // Must directly follow its endpoint.
                if endpoint.companion.is_some() || !endpoint.extra.is_empty() {
                    return Err(DescriptorError::Misplaced { offset, kind });
                }
                let (_, raw) = record_at(buf, offset, SsEndpointCompanionDescriptor::MIN_LEN)?;
                endpoint.companion = Some(read_fixed(raw));
                endpoint.companion_raw = raw;
            }
            USB_DESCRIPTOR_TYPE_INTERFACE_ASSOCIATION => {
                if let Some((iad_offset, ..)) = pending_iad {
                    return Err(DescriptorError::DanglingAssociation { offset: iad_offset });
                }
                let (_, raw) = record_at(buf, offset, InterfaceAssocDescriptor::MIN_LEN)?;
                pending_iad = Some((offset, read_fixed(raw), raw));
            }
            USB_DESCRIPTOR_TYPE_DEVICE
            | USB_DESCRIPTOR_TYPE_CONFIGURATION
            | USB_DESCRIPTOR_TYPE_OTHER_SPEED_CONFIGURATION => {
                return Err(DescriptorError::Misplaced { offset, kind });
            }
            _ => {
                // An association must be immediately followed by its first interface.
                if let Some((iad_offset, ..)) = pending_iad {
                    return Err(DescriptorError::DanglingAssociation { offset: iad_offset });
                }
                let extra = match cursor {
                    Cursor::Config => &mut config.extra,
                    Cursor::Alt { iface, alt } => {
                        &mut config.interfaces[iface].alternates[alt].extra
                    }
                    Cursor::Endpoint { iface, alt, ep } => {
                        &mut config.interfaces[iface].alternates[alt].endpoints[ep].extra
                    }
                };
                grow(extra, buf, offset, raw.len());
            }
        }
        offset += raw.len();
    }

    if let Some((iad_offset, ..)) = pending_iad {
        return Err(DescriptorError::DanglingAssociation { offset: iad_offset });
    }
    for (offset, iad) in associations {
        check_association_range(&config, offset, &iad)?;
    }
    Ok(config)
}

/// Every interface in `bFirstInterface..bFirstInterface + bInterfaceCount` must be present.
fn check_association_range(
    config: &ParsedConfig<'_>,
    offset: usize,
    iad: &InterfaceAssocDescriptor,
) -> Result<(), DescriptorError> {
    let first = u16::from(iad.b_first_interface);
    let end = first + u16::from(iad.b_interface_count);
    let missing = (first..end).find(|&number| {
        u8::try_from(number)
            .ok()
            .and_then(|number| config.interface(number))
            .is_none()
    });
    match missing {
        Some(missing) => Err(DescriptorError::AssociationGap {
            offset,
            first: iad.b_first_interface,
            count: iad.b_interface_count,
            missing,
        }),
        None => Ok(()),
    }
}

impl<'a> ParsedConfig<'a> {
    pub fn configuration_value(&self) -> u8 {
        self.header.b_configuration_value
    }

    pub fn interface(&self, number: u8) -> Option<&ParsedInterface<'a>> {
        self.interfaces.iter().find(|i| i.number == number)
    }

    pub fn alt_setting(&self, interface: u8, alternate: u8) -> Option<&ParsedAltSetting<'a>> {
        self.interface(interface)?
            .alternates
            .iter()
            .find(|a| a.header.b_alternate_setting == alternate)
    }

    /// Byte length of the set, summed over every parsed record.
    pub fn total_length(&self) -> usize {
        self.header_raw.len()
            + self.extra.len()
            + self
                .interfaces
                .iter()
                .map(ParsedInterface::encoded_len)
                .sum::<usize>()
    }

    pub fn check_total_length(&self) -> Result<(), DescriptorError> {
        let declared = self.header.total_length();
        let actual = self.total_length();
        if declared as usize != actual {
            return Err(DescriptorError::TotalLengthMismatch { declared, actual });
        }
        Ok(())
    }

    /// SuperSpeed devices must describe every endpoint with a companion descriptor.
    pub fn require_superspeed_companions(&self) -> Result<(), DescriptorError> {
        let missing = self
            .interfaces
            .iter()
            .flat_map(|i| i.alternates.iter())
            .flat_map(|a| a.endpoints.iter())
            .find(|e| e.companion.is_none());
        match missing {
            Some(ep) => Err(DescriptorError::MissingCompanion {
                endpoint: ep.header.b_endpoint_address,
            }),
            None => Ok(()),
        }
    }

    /// Re-encodes the set, recomputing `wTotalLength`, `bNumInterfaces` and every
    /// `bNumEndpoints` from the tree.
    pub fn to_bytes(&self) -> Vec<u8> {
        let total = self.total_length();
        let mut out = Vec::with_capacity(total);
        out.extend_from_slice(self.header_raw);
        let total = u16::try_from(total).unwrap_or(u16::MAX);
        out[2..4].copy_from_slice(&total.to_le_bytes());
        out[4] = u8::try_from(self.interfaces.len()).unwrap_or(u8::MAX);
        out.extend_from_slice(self.extra);

        for iface in &self.interfaces {
            out.extend_from_slice(iface.association_raw);
            for alt in &iface.alternates {
                let start = out.len();
                out.extend_from_slice(alt.header_raw);
                out[start + 4] = u8::try_from(alt.endpoints.len()).unwrap_or(u8::MAX);
                out.extend_from_slice(alt.extra);
                for ep in &alt.endpoints {
                    out.extend_from_slice(ep.header_raw);
                    out.extend_from_slice(ep.companion_raw);
                    out.extend_from_slice(ep.extra);
                }
            }
        }
        out
    }
}

impl ParsedInterface<'_> {
    fn encoded_len(&self) -> usize {
        self.association_raw.len()
            + self
                .alternates
                .iter()
                .map(|a| {
                    a.header_raw.len()
                        + a.extra.len()
                        + a.endpoints
                            .iter()
                            .map(|e| e.header_raw.len() + e.companion_raw.len() + e.extra.len())
                            .sum::<usize>()
                })
                .sum::<usize>()
    }
}

pub fn parse_device_descriptor(buf: &[u8]) -> Result<DeviceDescriptor, DescriptorError> {
    read_descriptor(buf, 0)
}

#[derive(Debug, Clone)]
pub struct ParsedBos<'a> {
    pub header: BosDescriptor,
    header_raw: &'a [u8],
    pub capabilities: Vec<ParsedCapability<'a>>,
}

#[derive(Debug, Clone, Copy)]
pub struct ParsedCapability<'a> {
    pub capability_type: u8,
    /// The whole record, header included.
    pub raw: &'a [u8],
}

pub fn parse_bos(buf: &[u8]) -> Result<ParsedBos<'_>, DescriptorError> {
    let (kind, header_raw) = record_at(buf, 0, BosDescriptor::MIN_LEN)?;
    if kind != USB_DESCRIPTOR_TYPE_BOS {
        return Err(DescriptorError::UnexpectedType {
            offset: 0,
            expected: USB_DESCRIPTOR_TYPE_BOS,
            found: kind,
        });
    }
    let mut bos = ParsedBos {
        header: read_fixed(header_raw),
        header_raw,
        capabilities: Vec::new(),
    };
    let mut offset = header_raw.len();
    while offset < buf.len() {
        let (kind, raw) = record_at(buf, offset, DeviceCapabilityHeader::MIN_LEN)?;
        if kind != USB_DESCRIPTOR_TYPE_DEVICE_CAPABILITY {
            return Err(DescriptorError::Misplaced { offset, kind });
        }
        let cap: DeviceCapabilityHeader = read_fixed(raw);
        bos.capabilities.push(ParsedCapability {
            capability_type: cap.b_dev_capability_type,
            raw,
        });
        offset += raw.len();
    }
    Ok(bos)
}

impl ParsedBos<'_> {
    pub fn total_length(&self) -> usize {
        self.header_raw.len() + self.capabilities.iter().map(|c| c.raw.len()).sum::<usize>()
    }

    pub fn capability(&self, capability_type: u8) -> Option<&ParsedCapability<'_>> {
        self.capabilities
            .iter()
            .find(|c| c.capability_type == capability_type)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let total = self.total_length();
        let mut out = Vec::with_capacity(total);
        out.extend_from_slice(self.header_raw);
        let total = u16::try_from(total).unwrap_or(u16::MAX);
        out[2..4].copy_from_slice(&total.to_le_bytes());
        out[4] = u8::try_from(self.capabilities.len()).unwrap_or(u8::MAX);
        for cap in &self.capabilities {
            out.extend_from_slice(cap.raw);
        }
        out
    }
}

/// Descriptors a device backend reports up front, so the root hub can follow configuration
/// changes without issuing its own control transfers.
#[derive(Debug, Clone)]
pub struct DescriptorCache {
    device: DeviceDescriptor,
    configurations: Vec<Vec<u8>>,
}

impl DescriptorCache {
    /// Validates every configuration set once; later lookups cannot fail to parse.
    pub fn new(device: &[u8], configurations: Vec<Vec<u8>>) -> Result<Self, DescriptorError> {
        let device = parse_device_descriptor(device)?;
        for config in &configurations {
            parse_configuration(config)?;
        }
        Ok(Self {
            device,
            configurations,
        })
    }

    pub fn device(&self) -> &DeviceDescriptor {
        &self.device
    }

    pub fn configuration_values(&self) -> impl Iterator<Item = u8> + '_ {
        self.configurations
            .iter()
            .filter_map(|c| parse_configuration(c).ok())
            .map(|c| c.configuration_value())
    }

    /// Looks a configuration up by `bConfigurationValue`.
    pub fn configuration(&self, value: u8) -> Option<ParsedConfig<'_>> {
        self.configurations
            .iter()
            .filter_map(|c| parse_configuration(c).ok())
            .find(|c| c.configuration_value() == value)
    }
}
