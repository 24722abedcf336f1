use kube::CustomResourceExt;
use imagescan_operator::crd::ImageScan;

fn main() {
    print!("{}", serde_yaml::to_string(&ImageScan::crd()).unwrap());
}
