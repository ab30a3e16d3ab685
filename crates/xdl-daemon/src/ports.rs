//! Free TCP port discovery

use std::net::{Ipv4Addr, TcpListener};

use xdl_core::prelude::*;

/// Find `count` distinct ports that can currently be bound, scanning upward
/// from `range_start`.
///
/// The probe listener is closed immediately, so another process may still
/// take the port before it is used.
pub fn find_free_ports(count: usize, range_start: u16) -> Result<Vec<u16>> {
    let mut ports = Vec::with_capacity(count);

    for candidate in range_start..=u16::MAX {
        if ports.len() == count {
            break;
        }
        if is_port_free(candidate) {
            ports.push(candidate);
        } else {
            trace!("port {} is in use", candidate);
        }
    }

    if ports.len() < count {
        return Err(Error::config(format!(
            "no {} free ports available at or above {}",
            count, range_start
        )));
    }

    debug!("allocated ports {:?}", ports);
    Ok(ports)
}

pub fn is_port_free(port: u16) -> bool {
    TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)).is_ok()
}
