pub mod pishock_service;

pub use pishock_service::{
    OperateRequest, PanelState, PanelStore, PiShockApi, PiShockOp, PiShockService,
};
