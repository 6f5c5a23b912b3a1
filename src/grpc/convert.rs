//! Conversions between protobuf messages and the transport-neutral types

use super::proto as pb;
use crate::types::{
    saturate_i32, CaptureGuestReq, ConnectNetworkReq, CreateGuestReq, DisconnectNetworkReq,
    EventMessage, ExecuteGuestMessage, Guest, HostInfo, Network, ResizeGuestReq, Snapshot,
    SysImage, UserImage, WaitResult,
};

impl From<pb::InfoMessage> for HostInfo {
    fn from(msg: pb::InfoMessage) -> Self {
        Self {
            id: msg.id,
            cpu: msg.cpu,
            mem: msg.mem,
            storage: msg.storage,
            resources: msg.resources,
        }
    }
}

impl From<pb::GetGuestMessage> for Guest {
    fn from(msg: pb::GetGuestMessage) -> Self {
        Self {
            id: msg.id,
            status: msg.status,
            transit_status: msg.transit_status,
            create_time: msg.create_time,
            transit_time: msg.transit_time,
            update_time: msg.update_time,
            cpu: msg.cpu,
            mem: msg.memory,
            storage: msg.storage,
            image_id: msg.image_id,
            image_name: msg.image_name,
            image_user: msg.image_user,
            networks: msg.networks,
            labels: msg.labels,
            ips: msg.ip_addrs,
            hostname: msg.hostname,
            running: msg.running,
        }
    }
}

impl From<CreateGuestReq> for pb::CreateGuestOptions {
    fn from(req: CreateGuestReq) -> Self {
        Self {
            cpu: req.cpu,
            memory: req.mem,
            image_name: req.image_name,
            image_user: req.image_user,
            volumes: req.volumes,
            dmi_uuid: req.dmi_uuid,
            labels: req.labels,
            ancestor_id: req.ancestor_id,
            cmd: req.cmd,
            lambda: req.lambda,
            stdin: req.stdin,
            resources: req.resources,
        }
    }
}

impl From<pb::ExecuteGuestMessage> for ExecuteGuestMessage {
    fn from(msg: pb::ExecuteGuestMessage) -> Self {
        Self {
            pid: msg.pid,
            data: msg.data,
            exit_code: saturate_i32(msg.exit_code),
        }
    }
}

impl From<ResizeGuestReq> for pb::ResizeGuestOptions {
    fn from(req: ResizeGuestReq) -> Self {
        Self {
            id: req.id,
            cpu: req.cpu,
            memory: req.mem,
            volumes: req.volumes,
            resources: req.resources,
        }
    }
}

impl From<CaptureGuestReq> for pb::CaptureGuestOptions {
    fn from(req: CaptureGuestReq) -> Self {
        Self {
            id: req.id,
            name: req.name,
            user: req.user,
            overridden: req.overridden,
        }
    }
}

impl From<pb::UserImageMessage> for UserImage {
    fn from(msg: pb::UserImageMessage) -> Self {
        Self {
            id: msg.id,
            name: msg.name,
            distro: msg.distro,
            latest_version: msg.latest_version,
            size: msg.size,
        }
    }
}

impl From<ConnectNetworkReq> for pb::ConnectNetworkOptions {
    fn from(req: ConnectNetworkReq) -> Self {
        Self {
            id: req.id,
            network: req.network,
            ipv4: req.ipv4,
        }
    }
}

impl From<DisconnectNetworkReq> for pb::DisconnectNetworkOptions {
    fn from(req: DisconnectNetworkReq) -> Self {
        Self {
            id: req.id,
            network: req.network,
        }
    }
}

impl From<pb::EventMessage> for EventMessage {
    fn from(msg: pb::EventMessage) -> Self {
        Self {
            id: msg.id,
            kind: msg.r#type,
            action: msg.action,
            time_nano: msg.time_nano,
        }
    }
}

impl From<pb::Network> for Network {
    fn from(msg: pb::Network) -> Self {
        Self {
            name: msg.name,
            subnets: msg.subnets,
        }
    }
}

impl From<pb::WaitGuestMessage> for WaitResult {
    fn from(msg: pb::WaitGuestMessage) -> Self {
        Self {
            msg: msg.msg,
            code: saturate_i32(msg.code),
        }
    }
}

impl From<pb::ListSnapshotMessageItem> for Snapshot {
    fn from(msg: pb::ListSnapshotMessageItem) -> Self {
        Self {
            vol_id: msg.vol_id,
            vol_mount_dir: msg.vol_mount_dir,
            snap_id: msg.snap_id,
            created_time: msg.created_time,
        }
    }
}

impl From<pb::SysImageMessage> for SysImage {
    fn from(msg: pb::SysImageMessage) -> Self {
        Self {
            name: msg.name,
            user: msg.user,
            distro: msg.distro,
            id: msg.id,
            kind: msg.r#type,
            size: msg.size,
            digest: msg.digest,
        }
    }
}
