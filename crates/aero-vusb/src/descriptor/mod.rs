//! Standard USB descriptor layouts and a borrowed parser for configuration descriptor sets.
//!
//! The raw structs mirror the wire layout (little-endian, packed) and are plain-old-data, so they
//! can be read straight out of a byte buffer with `bytemuck`. Multi-byte fields hold the raw
//! little-endian value; use the accessor methods to read them.

use bytemuck::{Pod, Zeroable};

use crate::error::DescriptorError;

mod parse;

pub use parse::{
    parse_bos, parse_configuration, parse_device_descriptor, DescriptorCache, ParsedAltSetting,
    ParsedBos, ParsedCapability, ParsedConfig, ParsedEndpoint, ParsedInterface,
};

pub const USB_DESCRIPTOR_TYPE_DEVICE: u8 = 0x01;
pub const USB_DESCRIPTOR_TYPE_CONFIGURATION: u8 = 0x02;
pub const USB_DESCRIPTOR_TYPE_STRING: u8 = 0x03;
pub const USB_DESCRIPTOR_TYPE_INTERFACE: u8 = 0x04;
pub const USB_DESCRIPTOR_TYPE_ENDPOINT: u8 = 0x05;
pub const USB_DESCRIPTOR_TYPE_DEVICE_QUALIFIER: u8 = 0x06;
pub const USB_DESCRIPTOR_TYPE_OTHER_SPEED_CONFIGURATION: u8 = 0x07;
pub const USB_DESCRIPTOR_TYPE_INTERFACE_ASSOCIATION: u8 = 0x0b;
pub const USB_DESCRIPTOR_TYPE_BOS: u8 = 0x0f;
pub const USB_DESCRIPTOR_TYPE_DEVICE_CAPABILITY: u8 = 0x10;
pub const USB_DESCRIPTOR_TYPE_SS_ENDPOINT_COMPANION: u8 = 0x30;
pub const USB_DESCRIPTOR_TYPE_SSP_ISOC_ENDPOINT_COMPANION: u8 = 0x31;

pub const USB_DEVICE_CAPABILITY_USB20_EXTENSION: u8 = 0x02;
pub const USB_DEVICE_CAPABILITY_SUPERSPEED_USB: u8 = 0x03;
pub const USB_DEVICE_CAPABILITY_CONTAINER_ID: u8 = 0x04;
pub const USB_DEVICE_CAPABILITY_SUPERSPEED_PLUS: u8 = 0x0a;

/// The fixed-layout part of a standard descriptor.
pub trait Descriptor: Pod {
    const TYPE: u8;
    /// Smallest acceptable `bLength`. Longer records are accepted; the surplus is kept raw.
    const MIN_LEN: usize = core::mem::size_of::<Self>();
}

#[repr(C, packed)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct DeviceDescriptor {
    pub b_length: u8,
    pub b_descriptor_type: u8,
    pub bcd_usb: u16,
    pub b_device_class: u8,
    pub b_device_sub_class: u8,
    pub b_device_protocol: u8,
    pub b_max_packet_size0: u8,
    pub id_vendor: u16,
    pub id_product: u16,
    pub bcd_device: u16,
    pub i_manufacturer: u8,
    pub i_product: u8,
    pub i_serial_number: u8,
    pub b_num_configurations: u8,
}

impl Descriptor for DeviceDescriptor {
    const TYPE: u8 = USB_DESCRIPTOR_TYPE_DEVICE;
}

impl DeviceDescriptor {
    pub fn usb_version(&self) -> u16 {
        u16::from_le(self.bcd_usb)
    }

    pub fn vendor_id(&self) -> u16 {
        u16::from_le(self.id_vendor)
    }

    pub fn product_id(&self) -> u16 {
        u16::from_le(self.id_product)
    }

    pub fn device_version(&self) -> u16 {
        u16::from_le(self.bcd_device)
    }
}

#[repr(C, packed)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct ConfigDescriptor {
    pub b_length: u8,
    pub b_descriptor_type: u8,
    pub w_total_length: u16,
    pub b_num_interfaces: u8,
    pub b_configuration_value: u8,
    pub i_configuration: u8,
    pub bm_attributes: u8,
    pub b_max_power: u8,
}

impl Descriptor for ConfigDescriptor {
    const TYPE: u8 = USB_DESCRIPTOR_TYPE_CONFIGURATION;
}

impl ConfigDescriptor {
    pub fn total_length(&self) -> u16 {
        u16::from_le(self.w_total_length)
    }

    pub fn self_powered(&self) -> bool {
        self.bm_attributes & 0x40 != 0
    }

    pub fn remote_wakeup(&self) -> bool {
        self.bm_attributes & 0x20 != 0
    }
}

#[repr(C, packed)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct InterfaceDescriptor {
    pub b_length: u8,
    pub b_descriptor_type: u8,
    pub b_interface_number: u8,
    pub b_alternate_setting: u8,
    pub b_num_endpoints: u8,
    pub b_interface_class: u8,
    pub b_interface_sub_class: u8,
    pub b_interface_protocol: u8,
    pub i_interface: u8,
}

impl Descriptor for InterfaceDescriptor {
    const TYPE: u8 = USB_DESCRIPTOR_TYPE_INTERFACE;
}

#[repr(C, packed)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct EndpointDescriptor {
    pub b_length: u8,
    pub b_descriptor_type: u8,
    pub b_endpoint_address: u8,
    pub bm_attributes: u8,
    pub w_max_packet_size: u16,
    pub b_interval: u8,
}

impl Descriptor for EndpointDescriptor {
    const TYPE: u8 = USB_DESCRIPTOR_TYPE_ENDPOINT;
}

/// Transfer type encoded in `bmAttributes` of an endpoint descriptor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EndpointKind {
    Control,
    Isochronous,
    Bulk,
    Interrupt,
}

impl EndpointDescriptor {
    pub fn number(&self) -> u8 {
        self.b_endpoint_address & 0x0f
    }

    pub fn is_in(&self) -> bool {
        self.b_endpoint_address & 0x80 != 0
    }

    pub fn kind(&self) -> EndpointKind {
        match self.bm_attributes & 0x03 {
            0 => EndpointKind::Control,
            1 => EndpointKind::Isochronous,
            2 => EndpointKind::Bulk,
            _ => EndpointKind::Interrupt,
        }
    }

    /// Packet size in bytes, without the high-bandwidth multiplier bits.
    pub fn max_packet_size(&self) -> u16 {
        u16::from_le(self.w_max_packet_size) & 0x07ff
    }
}

#[repr(C, packed)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct InterfaceAssocDescriptor {
    pub b_length: u8,
    pub b_descriptor_type: u8,
    pub b_first_interface: u8,
    pub b_interface_count: u8,
    pub b_function_class: u8,
    pub b_function_sub_class: u8,
    pub b_function_protocol: u8,
    pub i_function: u8,
}

impl Descriptor for InterfaceAssocDescriptor {
    const TYPE: u8 = USB_DESCRIPTOR_TYPE_INTERFACE_ASSOCIATION;
}

#[repr(C, packed)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct SsEndpointCompanionDescriptor {
    pub b_length: u8,
    pub b_descriptor_type: u8,
    pub b_max_burst: u8,
    pub bm_attributes: u8,
    pub w_bytes_per_interval: u16,
}

impl Descriptor for SsEndpointCompanionDescriptor {
    const TYPE: u8 = USB_DESCRIPTOR_TYPE_SS_ENDPOINT_COMPANION;
}

impl SsEndpointCompanionDescriptor {
    pub fn bytes_per_interval(&self) -> u16 {
        u16::from_le(self.w_bytes_per_interval)
    }
}

#[repr(C, packed)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct BosDescriptor {
    pub b_length: u8,
    pub b_descriptor_type: u8,
    pub w_total_length: u16,
    pub b_num_device_caps: u8,
}

impl Descriptor for BosDescriptor {
    const TYPE: u8 = USB_DESCRIPTOR_TYPE_BOS;
}

impl BosDescriptor {
    pub fn total_length(&self) -> u16 {
        u16::from_le(self.w_total_length)
    }
}

#[repr(C, packed)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct DeviceCapabilityHeader {
    pub b_length: u8,
    pub b_descriptor_type: u8,
    pub b_dev_capability_type: u8,
}

impl Descriptor for DeviceCapabilityHeader {
    const TYPE: u8 = USB_DESCRIPTOR_TYPE_DEVICE_CAPABILITY;
}

/// Splits the record at `offset` off `buf`, checking `bLength` against the buffer and `min`.
///
/// Returns `(bDescriptorType, record)`.
pub(crate) fn record_at(
    buf: &[u8],
    offset: usize,
    min: usize,
) -> Result<(u8, &[u8]), DescriptorError> {
    let rest = &buf[offset.min(buf.len())..];
    if rest.len() < 2 {
        return Err(DescriptorError::Truncated {
            offset,
            needed: 2,
            available: rest.len(),
        });
    }
    let len = rest[0];
    let kind = rest[1];
    if (len as usize) < min.max(2) {
        return Err(DescriptorError::TooShort {
            offset,
            kind,
            len,
            min: min.max(2),
        });
    }
    if rest.len() < len as usize {
        return Err(DescriptorError::Truncated {
            offset,
            needed: len as usize,
            available: rest.len(),
        });
    }
    Ok((kind, &rest[..len as usize]))
}

/// Reads a fixed-layout descriptor from the start of `record`, which must already have passed
/// [`record_at`] with `T::MIN_LEN`.
pub(crate) fn read_fixed<T: Descriptor>(record: &[u8]) -> T {
    bytemuck::pod_read_unaligned(&record[..core::mem::size_of::<T>()])
}

/// Reads and type-checks a single descriptor of kind `T` at `offset`.
pub fn read_descriptor<T: Descriptor>(buf: &[u8], offset: usize) -> Result<T, DescriptorError> {
    let (kind, record) = record_at(buf, offset, T::MIN_LEN)?;
    if kind != T::TYPE {
        return Err(DescriptorError::UnexpectedType {
            offset,
            expected: T::TYPE,
            found: kind,
        });
    }
    Ok(read_fixed(record))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layouts_match_wire_sizes() {
        assert_eq!(core::mem::size_of::<DeviceDescriptor>(), 18);
        assert_eq!(core::mem::size_of::<ConfigDescriptor>(), 9);
        assert_eq!(core::mem::size_of::<InterfaceDescriptor>(), 9);
        assert_eq!(core::mem::size_of::<EndpointDescriptor>(), 7);
        assert_eq!(core::mem::size_of::<InterfaceAssocDescriptor>(), 8);
        assert_eq!(core::mem::size_of::<SsEndpointCompanionDescriptor>(), 6);
        assert_eq!(core::mem::size_of::<BosDescriptor>(), 5);
        assert_eq!(core::mem::size_of::<DeviceCapabilityHeader>(), 3);
    }

    #[test]
    fn endpoint_accessors() {
        let ep: EndpointDescriptor =
            read_descriptor(&[0x07, 0x05, 0x81, 0x03, 0x40, 0x08, 0x0a], 0).unwrap();
        assert_eq!(ep.number(), 1);
        assert!(ep.is_in());
        assert_eq!(ep.kind(), EndpointKind::Interrupt);
        // Multiplier bits (12:11) are masked off.
        assert_eq!(ep.max_packet_size(), 0x040);
    }

    #[test]
    fn read_descriptor_rejects_short_length() {
        let err = read_descriptor::<EndpointDescriptor>(&[0x06, 0x05, 0x81, 0x03, 0x40, 0x00], 0)
            .unwrap_err();
        assert!(matches!(err, DescriptorError::TooShort { len: 6, min: 7, .. }));
    }

    #[test]
    fn read_descriptor_rejects_wrong_type() {
        let err = read_descriptor::<InterfaceDescriptor>(
            &[0x09, 0x02, 0x20, 0x00, 0x01, 0x01, 0x00, 0x80, 0x32],
            0,
        )
        .unwrap_err();
        assert_eq!(
            err,
            DescriptorError::UnexpectedType {
                offset: 0,
                expected: USB_DESCRIPTOR_TYPE_INTERFACE,
                found: USB_DESCRIPTOR_TYPE_CONFIGURATION,
            }
        );
    }

    #[test]
    fn read_descriptor_rejects_truncated_record() {
        let err = read_descriptor::<DeviceDescriptor>(&[0x12, 0x01, 0x00, 0x02], 0).unwrap_err();
        assert_eq!(
            err,
            DescriptorError::Truncated {
                offset: 0,
                needed: 18,
                available: 4,
            }
        );
    }
}
