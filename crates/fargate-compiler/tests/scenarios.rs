//! End-to-end compilation scenarios against the serialized template.

use rand::SeedableRng;
use rand::rngs::StdRng;
use serde_json::{Value, json};

use fargate_compiler::ports::REGISTERED_PORTS;
use fargate_compiler::{CompiledCluster, compile, compile_all_with_rng, compile_cluster_with_rng, emit};
use fargate_core::{ClusterSpec, CompileError, CompileResult, PluginConfig};

fn cluster(value: Value) -> ClusterSpec {
    serde_json::from_value(value).unwrap()
}

fn compile_seeded(spec: &ClusterSpec, stage: &str, seed: u64) -> CompileResult<CompiledCluster> {
    compile_cluster_with_rng(spec, stage, &mut StdRng::seed_from_u64(seed))
}

fn count(template: &Value, kind: &str) -> usize {
    template["Resources"]
        .as_object()
        .unwrap()
        .values()
        .filter(|r| r["Type"] == kind)
        .count()
}

fn web_app(auto_scale: Option<Value>) -> ClusterSpec {
    let mut service = json!({
        "name": "Web App!",
        "cpu": 256,
        "memory": 512,
        "port": 8080,
        "image": "registry.example.com/web:1.0",
        "protocols": [{ "protocol": "HTTP" }],
    });
    if let Some(scale) = auto_scale {
        service["autoScale"] = scale;
    }
    cluster(json!({
        "clusterName": "shop",
        "vpc": { "cidr": "10.0.0.0/16", "subnets": ["10.0.0.0/24", "10.0.1.0/24"] },
        "services": [service],
    }))
}

#[test]
fn single_http_service() {
    let compiled = compile_seeded(&web_app(None), "prod", 1).unwrap();
    let template = emit::render(&compiled.graph, None).unwrap();

    assert_eq!(count(&template, "AWS::ECS::TaskDefinition"), 1);
    assert_eq!(count(&template, "AWS::ECS::Service"), 1);
    assert_eq!(count(&template, "AWS::ElasticLoadBalancingV2::TargetGroup"), 1);
    assert_eq!(count(&template, "AWS::ElasticLoadBalancingV2::ListenerRule"), 1);
    assert_eq!(count(&template, "AWS::ApplicationAutoScaling::ScalableTarget"), 0);
    assert_eq!(count(&template, "AWS::ApplicationAutoScaling::ScalingPolicy"), 0);

    let resources = &template["Resources"];
    let rule = &resources["ShopWebAppALBListenerRuleProd0"];
    assert_eq!(rule["Properties"]["Priority"], 1);
    assert_eq!(rule["Properties"]["ListenerArn"], json!({ "Ref": "ShopALBListenerProd8080" }));
    assert_eq!(resources["ShopWebAppServiceProd"]["Properties"]["ServiceName"], "Web App!");
    assert_eq!(resources["ShopWebAppTGroupProdHttp"]["Properties"]["Port"], 8080);
    assert_eq!(
        template["Outputs"]["ShopWebAppEndpointProdHttp"]["Value"],
        json!({ "Fn::Join": ["", ["http://", { "Fn::GetAtt": ["ShopALBProd", "DNSName"] }, ":8080"]] })
    );
}

#[test]
fn autoscaling_adds_triple_with_default_cooldowns() {
    let compiled = compile_seeded(
        &web_app(Some(json!({
            "min": 1,
            "max": 4,
            "metric": "ECSServiceAverageCPUUtilization",
            "targetValue": 60,
        }))),
        "prod",
        1,
    )
    .unwrap();
    let template = emit::render(&compiled.graph, None).unwrap();

    assert_eq!(count(&template, "AWS::IAM::Role"), 2);
    assert_eq!(count(&template, "AWS::ApplicationAutoScaling::ScalableTarget"), 1);
    assert_eq!(count(&template, "AWS::ApplicationAutoScaling::ScalingPolicy"), 1);

    let resources = &template["Resources"];
    assert_eq!(resources["ShopWebAppASRoleProd"]["Type"], "AWS::IAM::Role");

    let target = &resources["ShopWebAppASTargetProd"]["Properties"];
    assert_eq!(target["ScalableDimension"], "ecs:service:DesiredCount");
    assert_eq!(target["MinCapacity"], 1);
    assert_eq!(target["MaxCapacity"], 4);
    assert_eq!(
        target["ResourceId"],
        json!({ "Fn::Join": ["/", [
            "service",
            { "Ref": "ShopClusterProd" },
            { "Fn::GetAtt": ["ShopWebAppServiceProd", "Name"] },
        ]] })
    );

    let policy = &resources["ShopWebAppASPolicyProd"]["Properties"]["TargetTrackingScalingPolicyConfiguration"];
    assert_eq!(policy["ScaleInCooldown"], 30);
    assert_eq!(policy["ScaleOutCooldown"], 30);
    assert_eq!(policy["TargetValue"], 60.0);
    assert_eq!(
        policy["PredefinedMetricSpecification"]["PredefinedMetricType"],
        "ECSServiceAverageCPUUtilization"
    );
}

#[test]
fn cooldowns_override_independently() {
    let compiled = compile_seeded(
        &web_app(Some(json!({
            "max": 2,
            "metric": "ECSServiceAverageMemoryUtilization",
            "targetValue": 70,
            "cooldown": 90,
            "cooldownOut": 15,
        }))),
        "prod",
        1,
    )
    .unwrap();
    let policy = &compiled.graph.get("ShopWebAppASPolicyProd").unwrap().properties
        ["TargetTrackingScalingPolicyConfiguration"];
    assert_eq!(policy["ScaleInCooldown"], 90);
    assert_eq!(policy["ScaleOutCooldown"], 15);
}

#[test]
fn request_count_metric_is_labelled() {
    let compiled = compile_seeded(
        &web_app(Some(json!({
            "max": 3,
            "metric": "ALBRequestCountPerTarget",
            "targetValue": 500,
        }))),
        "prod",
        1,
    )
    .unwrap();
    let metric = &compiled.graph.get("ShopWebAppASPolicyProd").unwrap().properties
        ["TargetTrackingScalingPolicyConfiguration"]["PredefinedMetricSpecification"];
    assert_eq!(
        metric["ResourceLabel"],
        json!({ "Fn::Join": ["/", [
            { "Fn::GetAtt": ["ShopALBProd", "LoadBalancerFullName"] },
            { "Fn::GetAtt": ["ShopWebAppTGroupProdHttp", "TargetGroupFullName"] },
        ]] })
    );
}

#[test]
fn https_without_certificates_fails() {
    let spec = cluster(json!({
        "clusterName": "shop",
        "services": [{
            "name": "web", "cpu": 256, "memory": 512, "image": "web",
            "protocols": [{ "protocol": "HTTPS", "certificateArns": [] }],
        }],
    }));
    let err = compile_seeded(&spec, "prod", 1).unwrap_err();
    assert!(matches!(err, CompileError::HttpsWithoutCertificate { .. }));
    assert!(err.to_string().contains("HTTPS"));
}

#[test]
fn shared_port_with_same_protocol_shares_listener() {
    let spec = cluster(json!({
        "clusterName": "shop",
        "services": [
            { "name": "catalog", "cpu": 256, "memory": 512, "port": 8080, "image": "c",
              "path": "/catalog/*", "priority": 1, "protocols": [{ "protocol": "HTTP" }] },
            { "name": "orders", "cpu": 256, "memory": 512, "port": 8080, "image": "o",
              "path": "/orders/*", "priority": 2, "protocols": [{ "protocol": "HTTP" }] },
        ],
    }));
    let compiled = compile_seeded(&spec, "prod", 1).unwrap();
    let graph = &compiled.graph;

    assert_eq!(graph.count_kind("AWS::ElasticLoadBalancingV2::Listener"), 1);
    let rules: Vec<_> = graph.of_kind("AWS::ElasticLoadBalancingV2::ListenerRule").collect();
    assert_eq!(rules.len(), 2);
    for (_, rule) in &rules {
        assert_eq!(rule.properties["ListenerArn"], json!({ "Ref": "ShopALBListenerProd8080" }));
    }
    assert_eq!(
        graph.get("ShopOrdersServiceProd").unwrap().depends_on,
        vec!["ShopOrdersALBListenerRuleProd0"]
    );
}

#[test]
fn default_priorities_on_shared_listener_still_compile() {
    let spec = cluster(json!({
        "clusterName": "shop",
        "services": [
            { "name": "a", "cpu": 256, "memory": 512, "port": 80, "image": "a",
              "protocols": [{ "protocol": "HTTP" }] },
            { "name": "b", "cpu": 256, "memory": 512, "port": 80, "image": "b",
              "protocols": [{ "protocol": "HTTP" }] },
        ],
    }));
    assert!(compile_seeded(&spec, "prod", 1).is_ok());
}

#[test]
fn shared_port_with_different_protocols_fails() {
    let spec = cluster(json!({
        "clusterName": "shop",
        "services": [
            { "name": "a", "cpu": 256, "memory": 512, "port": 8443, "image": "a",
              "protocols": [{ "protocol": "HTTPS", "certificateArns": ["arn:cert"] }] },
            { "name": "b", "cpu": 256, "memory": 512, "port": 8443, "image": "b",
              "protocols": [{ "protocol": "HTTP" }] },
        ],
    }));
    let err = compile_seeded(&spec, "prod", 1).unwrap_err();
    let message = err.to_string();
    assert!(message.contains("shop"), "{message}");
    assert!(message.contains("8443"), "{message}");
}

#[test]
fn path_list_priorities_follow_list_order() {
    let spec = cluster(json!({
        "clusterName": "shop",
        "services": [{
            "name": "api", "cpu": 256, "memory": 512, "port": 80, "image": "api",
            "protocols": [{ "protocol": "HTTP" }],
            "path": [
                { "path": "/users/*" },
                { "path": "/orders/*", "method": "GET" },
                { "path": "/carts/*", "method": "ANY" },
            ],
        }],
    }));
    let compiled = compile_seeded(&spec, "prod", 1).unwrap();
    let priorities: Vec<u64> = compiled
        .graph
        .of_kind("AWS::ElasticLoadBalancingV2::ListenerRule")
        .map(|(_, rule)| rule.properties["Priority"].as_u64().unwrap())
        .collect();
    assert_eq!(priorities, vec![1, 2, 3]);
    assert_eq!(
        compiled.graph.get("ShopApiServiceProd").unwrap().depends_on,
        vec![
            "ShopApiALBListenerRuleProd0",
            "ShopApiALBListenerRuleProd1",
            "ShopApiALBListenerRuleProd2",
        ]
    );
}

#[test]
fn unpinned_ports_are_registered_and_pinned_ports_exact() {
    let spec = cluster(json!({
        "clusterName": "shop",
        "services": [
            { "name": "pinned", "cpu": 256, "memory": 512, "port": 9000, "image": "p",
              "protocols": [{ "protocol": "HTTP" }] },
            { "name": "free", "cpu": 256, "memory": 512, "image": "f",
              "protocols": [{ "protocol": "HTTP" }] },
        ],
    }));
    for seed in 0..20 {
        let compiled = compile_seeded(&spec, "prod", seed).unwrap();
        let pinned = &compiled.graph.get("ShopPinnedTGroupProdHttp").unwrap().properties;
        assert_eq!(pinned["Port"], 9000);
        let free = compiled.graph.get("ShopFreeTGroupProdHttp").unwrap().properties["Port"]
            .as_u64()
            .unwrap() as u16;
        assert!(REGISTERED_PORTS.contains(&free));
        assert_ne!(free, 9000);
    }
}

#[test]
fn existing_network_creates_no_network_resources() {
    let spec = cluster(json!({
        "clusterName": "shop",
        "vpc": {
            "vpcId": "vpc-0abc",
            "securityGroupIds": ["sg-0abc"],
            "subnetIds": ["subnet-1", "subnet-2"],
        },
        "services": [{
            "name": "web", "cpu": 256, "memory": 512, "port": 80, "image": "web",
            "protocols": [{ "protocol": "HTTP" }],
        }],
    }));
    let compiled = compile_seeded(&spec, "prod", 1).unwrap();
    let graph = &compiled.graph;

    for kind in [
        "AWS::EC2::VPC",
        "AWS::EC2::Subnet",
        "AWS::EC2::InternetGateway",
        "AWS::EC2::VPCGatewayAttachment",
        "AWS::EC2::RouteTable",
        "AWS::EC2::Route",
        "AWS::EC2::SubnetRouteTableAssociation",
        "AWS::EC2::SecurityGroup",
        "AWS::EC2::SecurityGroupIngress",
    ] {
        assert_eq!(graph.count_kind(kind), 0, "{kind}");
    }
    assert!(!graph.contains("ShopContainerSecGroupProd"));

    let service = graph.get("ShopWebServiceProd").unwrap();
    let placement = &service.properties["NetworkConfiguration"]["AwsvpcConfiguration"];
    assert_eq!(placement["SecurityGroups"], json!(["sg-0abc"]));
    assert_eq!(placement["Subnets"], json!(["subnet-1", "subnet-2"]));
    assert_eq!(placement["AssignPublicIp"], "DISABLED");
    assert_eq!(
        graph.get("ShopWebTGroupProdHttp").unwrap().properties["VpcId"],
        "vpc-0abc"
    );
}

#[test]
fn names_ignore_casing_and_punctuation() {
    let a = web_app(None);
    let mut b = web_app(None);
    b.services[0].name = "web-app".to_string();
    let ids_a: Vec<String> = compile_seeded(&a, "prod", 1)
        .unwrap()
        .logical_ids()
        .into_iter()
        .map(String::from)
        .collect();
    let ids_b: Vec<String> = compile_seeded(&b, "prod", 1)
        .unwrap()
        .logical_ids()
        .into_iter()
        .map(String::from)
        .collect();
    assert_eq!(ids_a, ids_b);
}

#[test]
fn compilation_is_deterministic_for_pinned_ports() {
    let spec = web_app(None);
    let first = compile(&spec, "prod").unwrap();
    let second = compile(&spec, "prod").unwrap();
    assert_eq!(first, second);
}

#[test]
fn multiple_clusters_union_cleanly() {
    let config = PluginConfig {
        clusters: vec![
            web_app(None),
            cluster(json!({
                "clusterName": "billing",
                "namePrefix": "corp",
                "vpc": { "cidr": "10.1.0.0/16", "subnets": ["10.1.0.0/24"] },
                "services": [{
                    "name": "invoices", "cpu": 256, "memory": 512, "port": 8080, "image": "inv",
                    "protocols": [{ "protocol": "HTTP" }],
                }],
            })),
        ],
    };
    let graph = compile_all_with_rng(&config, "prod", &mut StdRng::seed_from_u64(3)).unwrap();
    assert!(graph.contains("ShopClusterProd"));
    assert!(graph.contains("CorpBillingClusterProd"));
    assert_eq!(graph.count_kind("AWS::ECS::Cluster"), 2);
    graph.verify_references().unwrap();
}

#[test]
fn duplicate_clusters_collide() {
    let config = PluginConfig {
        clusters: vec![web_app(None), web_app(None)],
    };
    let err = compile_all_with_rng(&config, "prod", &mut StdRng::seed_from_u64(3)).unwrap_err();
    assert!(matches!(err, CompileError::DuplicateLogicalId(_)));
}

#[test]
fn https_listener_with_authorizer() {
    let spec = cluster(json!({
        "clusterName": "shop",
        "public": true,
        "services": [{
            "name": "admin", "cpu": 256, "memory": 512, "port": 443, "image": "admin",
            "protocols": [{
                "protocol": "HTTPS",
                "certificateArns": ["arn:aws:acm:eu-west-1:1:certificate/abc"],
                "authorizer": {
                    "poolArn": "arn:aws:cognito-idp:eu-west-1:1:userpool/pool",
                    "clientId": "client",
                    "poolDomain": "shop-auth",
                },
            }],
        }],
    }));
    let compiled = compile_seeded(&spec, "prod", 1).unwrap();
    let graph = &compiled.graph;

    let listener = graph.get("ShopALBListenerProd443").unwrap();
    assert_eq!(listener.properties["Protocol"], "HTTPS");
    assert_eq!(
        listener.properties["Certificates"][0]["CertificateArn"],
        "arn:aws:acm:eu-west-1:1:certificate/abc"
    );
    let rule = graph.get("ShopAdminALBListenerRuleProd0").unwrap();
    assert_eq!(rule.properties["Actions"][0]["Type"], "authenticate-cognito");
    assert_eq!(graph.get("ShopALBProd").unwrap().properties["Scheme"], "internet-facing");
    let placement = &graph.get("ShopAdminServiceProd").unwrap().properties["NetworkConfiguration"];
    assert_eq!(placement["AwsvpcConfiguration"]["AssignPublicIp"], "ENABLED");
    assert!(graph.outputs.contains_key("ShopAdminEndpointProdHttps"));
}

#[test]
fn service_without_load_balancing_keeps_cluster_front_end() {
    let spec = cluster(json!({
        "clusterName": "shop",
        "services": [
            { "name": "web", "cpu": 256, "memory": 512, "port": 80, "image": "web",
              "protocols": [{ "protocol": "HTTP" }] },
            { "name": "worker", "cpu": 256, "memory": 512, "image": "worker", "disableELB": true,
              "protocols": [{ "protocol": "HTTP" }] },
        ],
    }));
    let compiled = compile_seeded(&spec, "prod", 1).unwrap();
    let graph = &compiled.graph;
    assert!(graph.contains("ShopALBProd"));
    assert!(graph.contains("ShopWebTGroupProdHttp"));
    assert!(!graph.contains("ShopWorkerTGroupProdHttp"));
    assert!(!graph.outputs.contains_key("ShopWorkerEndpointProdHttp"));
    assert!(graph.get("ShopWorkerServiceProd").unwrap().depends_on.is_empty());
}

#[test]
fn private_cluster_on_synthesized_network_keeps_public_ip() {
    let compiled = compile_seeded(&web_app(None), "prod", 1).unwrap();
    let graph = &compiled.graph;
    assert_eq!(graph.get("ShopALBProd").unwrap().properties["Scheme"], "internal");
    let placement = &graph.get("ShopWebAppServiceProd").unwrap().properties["NetworkConfiguration"];
    assert_eq!(placement["AwsvpcConfiguration"]["AssignPublicIp"], "ENABLED");
}

#[test]
fn stages_get_distinct_cluster_names() {
    let spec = web_app(None);
    let prod = compile_seeded(&spec, "prod", 1).unwrap();
    let dev = compile_seeded(&spec, "dev", 1).unwrap();
    let prod_name = &prod.graph.get("ShopClusterProd").unwrap().properties["ClusterName"];
    let dev_name = &dev.graph.get("ShopClusterDev").unwrap().properties["ClusterName"];
    assert_ne!(prod_name, dev_name);
}

#[test]
fn out_of_range_priority_fails() {
    let spec = cluster(json!({
        "clusterName": "shop",
        "services": [{
            "name": "web", "cpu": 256, "memory": 512, "port": 80, "image": "web",
            "priority": 50000,
            "path": [{ "path": "/a" }, { "path": "/b" }],
            "protocols": [{ "protocol": "HTTP" }],
        }],
    }));
    let err = compile_seeded(&spec, "prod", 1).unwrap_err();
    assert!(matches!(err, CompileError::InvalidPriority { priority: 50000, rules: 2, .. }));
    assert!(err.to_string().contains("50000"));
}
