use super::*;

fn indexed(resolver: &dyn ServiceResolver, services: Vec<ServiceDefinition>) -> Vec<Arc<ServiceDefinition>> {
	services
		.into_iter()
		.map(|service| {
			resolver.service_created(&service).unwrap();
			Arc::new(service)
		})
		.collect()
}

fn ids(resolution: &Resolution) -> Vec<u64> {
	match resolution {
		Resolution::Narrowed(services) => services.iter().map(|s| s.id.0).collect(),
		_ => Vec::new(),
	}
}

#[test]
fn route_keys_parse() {
	assert_eq!(RouteKey::parse(Some("/foo"), "/*"), Ok(RouteKey::Exact("/foo".to_string())));
	assert_eq!(RouteKey::parse(Some("/foo/*"), "/*"), Ok(RouteKey::Prefix("/foo/".to_string())));
	assert_eq!(RouteKey::parse(Some("/*"), "/*"), Ok(RouteKey::CatchAll));
	assert_eq!(RouteKey::parse(None, "/*"), Ok(RouteKey::Unrouted));
	assert_eq!(RouteKey::parse(Some("  "), "/*"), Ok(RouteKey::Unrouted));
	assert!(RouteKey::parse(Some("foo"), "/*").is_err());
	assert!(RouteKey::parse(Some("/a*b"), "/*").is_err());
	assert!(RouteKey::parse(Some("/a*"), "/*").is_err());
}

#[test]
fn uri_tiers_prefer_most_specific() {
	let resolver = UriResolver::new("/*");
	let services = indexed(
		&resolver,
		vec![
			ServiceDefinition::new(1, 1, "exact").routed("/api/quotes"),
			ServiceDefinition::new(2, 1, "api").routed("/api/*"),
			ServiceDefinition::new(3, 1, "quotes").routed("/api/quotes/*"),
			ServiceDefinition::new(4, 1, "unrouted"),
			ServiceDefinition::new(5, 1, "catch-all").routed("/*"),
		],
	);

	assert_eq!(ids(&resolver.resolve(&services, &InboundRequest::to_path("/api/quotes"))), vec![1]);
	assert_eq!(ids(&resolver.resolve(&services, &InboundRequest::to_path("/api/quotes/today"))), vec![3]);
	assert_eq!(ids(&resolver.resolve(&services, &InboundRequest::to_path("/api/orders"))), vec![2]);
	assert_eq!(ids(&resolver.resolve(&services, &InboundRequest::to_path("/other"))), vec![4]);

	let without_unrouted: Vec<_> = services.iter().filter(|s| s.id.0 != 4).cloned().collect();
	assert_eq!(ids(&resolver.resolve(&without_unrouted, &InboundRequest::to_path("/other"))), vec![5]);
}

#[test]
fn uri_without_path_passes_through() {
	let resolver = UriResolver::new("/*");
	let services = indexed(&resolver, vec![ServiceDefinition::new(1, 1, "a").routed("/a")]);
	assert_eq!(resolver.resolve(&services, &InboundRequest::default()), Resolution::NotApplicable);
}

#[test]
fn uri_miss_is_no_match() {
	let resolver = UriResolver::new("/*");
	let services = indexed(&resolver, vec![ServiceDefinition::new(1, 1, "a").routed("/a")]);
	assert_eq!(resolver.resolve(&services, &InboundRequest::to_path("/b")), Resolution::NoMatch);
}

#[test]
fn uri_index_follows_updates_and_deletes() {
	let resolver = UriResolver::new("/*");
	let original = ServiceDefinition::new(1, 1, "a").routed("/foo");
	resolver.service_created(&original).unwrap();

	let moved = original.redeployed(2).routed("/bar");
	resolver.service_updated(&moved).unwrap();
	let candidates = vec![Arc::new(moved)];
	assert_eq!(resolver.resolve(&candidates, &InboundRequest::to_path("/foo")), Resolution::NoMatch);
	assert_eq!(ids(&resolver.resolve(&candidates, &InboundRequest::to_path("/bar"))), vec![1]);

	resolver.service_deleted(ServiceId(1));
	assert_eq!(resolver.route_key(ServiceId(1)), None);
	assert_eq!(resolver.resolve(&candidates, &InboundRequest::to_path("/bar")), Resolution::NoMatch);
}

#[test]
fn invalid_routing_key_is_reported_and_not_indexed() {
	let resolver = UriResolver::new("/*");
	let err = resolver.service_created(&ServiceDefinition::new(9, 1, "bad").routed("/a*b")).unwrap_err();
	assert!(matches!(err, ResolverError::InvalidKey { resolver: "uri", .. }));
	assert_eq!(resolver.route_key(ServiceId(9)), None);
}

#[test]
fn soap_action_prefers_declaring_services_then_agnostic() {
	let resolver = SoapActionResolver::default();
	let services = indexed(
		&resolver,
		vec![
			ServiceDefinition::new(1, 1, "quotes").soap_contract(["urn:getQuote"], ["urn:quotes"], ["getQuote"]),
			ServiceDefinition::new(2, 1, "orders").soap_contract(["urn:placeOrder"], ["urn:orders"], ["placeOrder"]),
			ServiceDefinition::new(3, 1, "any"),
		],
	);

	let quoted = InboundRequest::to_path("/svc").soap(Some("\"urn:getQuote\""), None, None);
	assert_eq!(ids(&resolver.resolve(&services, &quoted)), vec![1]);

	let unknown = InboundRequest::to_path("/svc").soap(Some("urn:cancel"), None, None);
	assert_eq!(ids(&resolver.resolve(&services, &unknown)), vec![3]);

	let empty = InboundRequest::to_path("/svc").soap(Some("\"\""), None, None);
	assert_eq!(resolver.resolve(&services, &empty), Resolution::NotApplicable);
}

#[test]
fn urn_uses_message_content_and_narrows_by_namespace() {
	let resolver = UrnResolver::default();
	assert!(resolver.uses_message_content());
	let services = indexed(
		&resolver,
		vec![
			ServiceDefinition::new(1, 1, "quotes").soap_contract(Vec::<String>::new(), ["urn:quotes"], ["getQuote"]),
			ServiceDefinition::new(2, 1, "orders").soap_contract(Vec::<String>::new(), ["urn:orders"], ["placeOrder"]),
		],
	);

	let request = InboundRequest::default().soap(None, Some("urn:orders"), Some("placeOrder"));
	assert_eq!(ids(&resolver.resolve(&services, &request)), vec![2]);

	let foreign = InboundRequest::default().soap(None, Some("urn:weather"), None);
	assert_eq!(resolver.resolve(&services, &foreign), Resolution::NoMatch);
	assert_eq!(resolver.resolve(&services, &InboundRequest::default()), Resolution::NotApplicable);
}

#[test]
fn hint_resolver_selects_by_id() {
	let services = vec![Arc::new(ServiceDefinition::new(1, 1, "a")), Arc::new(ServiceDefinition::new(2, 1, "b"))];
	let resolver = ServiceHintResolver;
	assert_eq!(resolver.resolve(&services, &InboundRequest::default()), Resolution::NotApplicable);
	assert_eq!(ids(&resolver.resolve(&services, &InboundRequest::default().hinted(ServiceId(2)))), vec![2]);
	assert_eq!(resolver.resolve(&services, &InboundRequest::default().hinted(ServiceId(3))), Resolution::NoMatch);
}

#[test]
fn operation_check_applies_only_to_strict_soap_services() {
	let strict = ServiceDefinition::new(1, 1, "quotes").soap_contract(["urn:getQuote"], ["urn:quotes"], ["getQuote"]);
	let soap = |op: Option<&str>| InboundRequest::to_path("/q").soap(None, None, op);

	assert_eq!(check_operation(&strict, &soap(Some("getQuote"))), OperationCheck::Passed);
	assert_eq!(check_operation(&strict, &soap(Some("cancel"))), OperationCheck::OperationMismatch);
	assert_eq!(check_operation(&strict, &soap(None)), OperationCheck::OperationMismatch);
	assert_eq!(check_operation(&strict, &InboundRequest::to_path("/q")), OperationCheck::NotSoap);
	assert_eq!(check_operation(&strict.clone().lax(), &InboundRequest::to_path("/q")), OperationCheck::Passed);
	assert_eq!(check_operation(&ServiceDefinition::new(2, 1, "rest"), &InboundRequest::to_path("/q")), OperationCheck::Passed);
}
