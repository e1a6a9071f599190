//! Built-in RPC handlers and registration.

pub mod system;

use crate::rpc::registry::MethodRegistry;

/// Register the built-in handlers with the registry.
pub fn register_all(registry: &mut MethodRegistry) {
    registry.register("system.ping", system::PingHandler);
    registry.register("system.methods", system::MethodsHandler);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registers_builtins() {
        let mut reg = MethodRegistry::new();
        register_all(&mut reg);
        assert!(reg.has_method("system.ping"));
        assert!(reg.has_method("system.methods"));
        assert_eq!(reg.methods().len(), 2);
    }
}
