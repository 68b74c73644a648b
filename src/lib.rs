// Kernel proxy library entry point

pub mod internal {
    pub mod wire {
        pub mod codec;
    }
    pub mod launch {
        pub mod install;
        pub mod spec;
    }
    pub mod kernel {
        pub mod child;
        pub mod relay;
    }
    pub mod connect;
    pub mod proxy;
}

// Re-export key types for external use
pub use internal::connect::{ConnectError, ConnectionInfo};
pub use internal::kernel::child::{ChildError, ChildKernelHandle};
pub use internal::launch::install::{find_kernel_specs, InstallStatus};
pub use internal::launch::spec::{LaunchSpecResolver, SpecError};
pub use internal::proxy::{ProxyError, ProxyFront, RESTART_DIRECTIVE};
pub use internal::wire::codec::{Header, Session, WireError, WireMessage};
