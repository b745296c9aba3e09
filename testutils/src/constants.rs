pub const TEST_NAMESPACE: &str = "test";
pub const TEST_DEPLOYMENT: &str = "the-deployment";
pub const TEST_REPLICASET: &str = "the-replicaset";
pub const TEST_USER: &str = "alice";
pub const TEST_CONTROLLER_USER: &str = "system:serviceaccount:kube-system:deployment-controller";
pub const TEST_FIELD_MANAGER: &str = "kube-controller-manager";
pub const TEST_REQUEST_UID: &str = "705ab4f5-6393-4dd1-af29-7ce7cb6b0a33";
