//! Address codec: the tagged-union wire format for a proxy destination,
//! consumed by both the stream and datagram paths to parse the decrypted
//! handshake/inner-packet header. Built with `nom` byte-combinators
//! (`nom::bytes::complete::take` + `nom::number::complete::{u8, be_u16}`).

use std::net::{Ipv4Addr, Ipv6Addr};

use nom::{
    bytes::complete::take,
    number::complete::{be_u16, u8},
    IResult,
};

use crate::errors::{Error, Result};

const ATYP_IPV4: u8 = 0x01;
const ATYP_DOMAIN: u8 = 0x03;
const ATYP_IPV6: u8 = 0x04;

/// A proxy destination: an IPv4/IPv6 socket address or a domain name plus
/// port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Address {
    Ipv4 { addr: Ipv4Addr, port: u16 },
    Ipv6 { addr: Ipv6Addr, port: u16 },
    Domain { host: String, port: u16 },
}

impl Address {
    pub fn port(&self) -> u16 {
        match self {
            Address::Ipv4 { port, .. } | Address::Ipv6 { port, .. } | Address::Domain { port, .. } => *port,
        }
    }

    /// Serializes this address into the wire tagged-union format.
    pub fn encode(&self, out: &mut Vec<u8>) {
        match self {
            Address::Ipv4 { addr, port } => {
                out.push(ATYP_IPV4);
                out.extend_from_slice(&addr.octets());
                out.extend_from_slice(&port.to_be_bytes());
            }
            Address::Ipv6 { addr, port } => {
                out.push(ATYP_IPV6);
                out.extend_from_slice(&addr.octets());
                out.extend_from_slice(&port.to_be_bytes());
            }
            Address::Domain { host, port } => {
                out.push(ATYP_DOMAIN);
                // Length prefix is a single `u8`; a caller constructing an
                // address with a longer domain has no valid wire encoding.
                out.push(host.len() as u8);
                out.extend_from_slice(host.as_bytes());
                out.extend_from_slice(&port.to_be_bytes());
            }
        }
    }

    /// Parses one `Address` from the front of `input`, returning the
    /// remaining bytes.
    pub fn parse(input: &[u8]) -> Result<(&[u8], Address)> {
        parse_address(input).map_err(|e| Error::BadAddress(e.to_string()))
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Address::Ipv4 { addr, port } => write!(f, "{addr}:{port}"),
            Address::Ipv6 { addr, port } => write!(f, "[{addr}]:{port}"),
            Address::Domain { host, port } => write!(f, "{host}:{port}"),
        }
    }
}

fn parse_address(input: &[u8]) -> IResult<&[u8], Address> {
    let (input, atyp) = u8(input)?;
    match atyp {
        ATYP_IPV4 => {
            let (input, octets) = take(4u8)(input)?;
            let (input, port) = be_u16(input)?;
            let addr = Ipv4Addr::new(octets[0], octets[1], octets[2], octets[3]);
            Ok((input, Address::Ipv4 { addr, port }))
        }
        ATYP_IPV6 => {
            let (input, octets) = take(16u8)(input)?;
            let (input, port) = be_u16(input)?;
            let mut buf = [0u8; 16];
            buf.copy_from_slice(octets);
            Ok((
                input,
                Address::Ipv6 {
                    addr: Ipv6Addr::from(buf),
                    port,
                },
            ))
        }
        ATYP_DOMAIN => {
            let (input, len) = u8(input)?;
            let (input, host_bytes) = take(len)(input)?;
            let (input, port) = be_u16(input)?;
            let host = String::from_utf8_lossy(host_bytes).into_owned();
            Ok((input, Address::Domain { host, port }))
        }
        _ => Err(nom::Err::Failure(nom::error::Error::new(
            input,
            nom::error::ErrorKind::Switch,
        ))),
    }
}
