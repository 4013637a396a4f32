//! Introspection metadata (§4.5, §6): describing a service's methods and
//! events so a peer can discover and call it without an offline schema.

use webrpc_protocol::{
    DiscoveredService, EventIntrospection, IntrospectedService, MethodIntrospection,
    ParameterIntrospection, SimpleType,
};

/// Declarative description of one method, built with the fluent
/// [`MethodIntrospectionBuilder`] and consumed by [`ServiceIntrospectionBuilder`].
pub struct MethodDescriptor {
    pub name: String,
    pub description: String,
    pub simple_return_type: SimpleType,
    pub parameters: Vec<ParameterIntrospection>,
}

pub fn method(name: impl Into<String>, simple_return_type: SimpleType) -> MethodDescriptor {
    MethodDescriptor {
        name: name.into(),
        description: String::new(),
        simple_return_type,
        parameters: Vec::new(),
    }
}

impl MethodDescriptor {
    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn param(mut self, name: impl Into<String>, simple_type: SimpleType) -> Self {
        self.parameters.push(ParameterIntrospection {
            name: name.into(),
            description: String::new(),
            simple_type,
        });
        self
    }
}

pub struct EventDescriptor {
    pub name: String,
    pub description: String,
}

pub fn event(name: impl Into<String>) -> EventDescriptor {
    EventDescriptor {
        name: name.into(),
        description: String::new(),
    }
}

impl EventDescriptor {
    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// Builds the [`IntrospectedService`] returned by `getServiceIntrospection`.
pub struct ServiceIntrospectionBuilder {
    name: String,
    description: String,
    methods: Vec<MethodDescriptor>,
    events: Vec<EventDescriptor>,
}

impl ServiceIntrospectionBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            methods: Vec::new(),
            events: Vec::new(),
        }
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn method(mut self, method: MethodDescriptor) -> Self {
        self.methods.push(method);
        self
    }

    pub fn event(mut self, event: EventDescriptor) -> Self {
        self.events.push(event);
        self
    }

    pub fn build(self) -> IntrospectedService {
        IntrospectedService {
            name: self.name,
            description: self.description,
            methods: self
                .methods
                .into_iter()
                .map(|m| MethodIntrospection {
                    name: m.name,
                    description: m.description,
                    simple_return_type: m.simple_return_type,
                    parameters: m.parameters,
                })
                .collect(),
            events: self
                .events
                .into_iter()
                .map(|e| EventIntrospection {
                    name: e.name,
                    description: e.description,
                })
                .collect(),
        }
    }
}

pub fn discovered(name: impl Into<String>, description: impl Into<String>) -> DiscoveredService {
    DiscoveredService {
        name: name.into(),
        description: description.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_produces_expected_method_shape() {
        let introspected = ServiceIntrospectionBuilder::new("Calculator")
            .describe("Adds numbers")
            .method(
                method("add", SimpleType::Number)
                    .describe("Sums two numbers")
                    .param("a", SimpleType::Number)
                    .param("b", SimpleType::Number),
            )
            .event(event("overflow").describe("Fires when a sum overflows"))
            .build();

        assert_eq!(introspected.name, "Calculator");
        assert_eq!(introspected.methods.len(), 1);
        assert_eq!(introspected.methods[0].parameters.len(), 2);
        assert_eq!(introspected.events[0].name, "overflow");
    }
}
